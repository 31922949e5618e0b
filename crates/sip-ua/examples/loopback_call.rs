//! Two user agents on one tokio runtime
//!
//! Alice calls Bob through in-memory channels, Bob answers, Alice hangs up.
//! Every message crossing the "wire" is printed.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=sip_ua=debug cargo run -p sip-ua --example loopback_call
//! ```

use std::sync::Arc;

use sip_core::{Body, HeaderAccess, Method, Response, SipMessage, SipUri};
use sip_ua::methods::{InviteUac, InviteUas};
use sip_ua::{
    runner, ChannelTransport, DefaultSessionDelegate, InviteClientDelegate, RequestOptions,
    ResponseOptions, RunnerHandle, SessionHandle, TokioClock, UserAgentCore, UserAgentCoreConfig,
    UserAgentCoreDelegate,
};
use tokio::sync::mpsc;

struct AnsweringMachine;

impl UserAgentCoreDelegate for AnsweringMachine {
    fn on_invite(&mut self, core: &mut UserAgentCore, invite: InviteUas) {
        let answer = Body::sdp("v=0\r\no=bob 1 1 IN IP4 192.0.2.2\r\ns=-\r\n");
        if let Err(err) = invite.accept(
            core,
            ResponseOptions::default().with_body(answer),
            Box::new(DefaultSessionDelegate),
        ) {
            eprintln!("bob could not answer: {err}");
        }
    }
}

struct Caller {
    established: mpsc::UnboundedSender<SessionHandle>,
}

impl InviteClientDelegate for Caller {
    fn on_accept(&mut self, core: &mut UserAgentCore, session: SessionHandle, response: &Response) {
        println!("alice: call answered with {}", response.code());
        if session.ack(core, None).is_ok() {
            let _ = self.established.send(session);
        }
    }

    fn on_reject(&mut self, _core: &mut UserAgentCore, response: &Response) {
        println!("alice: call rejected with {}", response.code());
    }
}

fn agent(
    user: &str,
    host: &str,
    delegate: Box<dyn UserAgentCoreDelegate>,
) -> anyhow::Result<(RunnerHandle, tokio::task::JoinHandle<UserAgentCore>, mpsc::UnboundedReceiver<SipMessage>)>
{
    let config = UserAgentCoreConfig {
        aor: format!("sip:{user}@example.com"),
        contact: format!("sip:{user}@{host}"),
        via_host: host.to_string(),
        ..Default::default()
    };
    let (transport, wire) = ChannelTransport::new();
    let core = UserAgentCore::with_clock(config, Box::new(transport), delegate, Arc::new(TokioClock))?;
    let (handle, task) = runner::spawn(core);
    Ok((handle, task, wire))
}

/// Carries everything one agent sends to the other.
fn connect(from: &'static str, mut wire: mpsc::UnboundedReceiver<SipMessage>, to: RunnerHandle) {
    tokio::spawn(async move {
        while let Some(message) = wire.recv().await {
            match &message {
                SipMessage::Request(request) => println!("{from} -> {}", request.method()),
                SipMessage::Response(response) => println!(
                    "{from} -> {} {}",
                    response.code(),
                    response.cseq().map(|cseq| cseq.method.to_string()).unwrap_or_default()
                ),
            }
            if to.deliver(message).is_err() {
                break;
            }
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (alice, alice_task, alice_wire) = agent("alice", "192.0.2.1:5060", Box::new(sip_ua::DefaultCoreDelegate))?;
    let (bob, bob_task, bob_wire) = agent("bob", "192.0.2.2:5060", Box::new(AnsweringMachine))?;
    connect("alice", alice_wire, bob.clone());
    connect("bob", bob_wire, alice.clone());

    let (established_tx, mut established) = mpsc::unbounded_channel();
    alice
        .execute(move |core| -> anyhow::Result<()> {
            let target = SipUri::parse("sip:bob@192.0.2.2:5060")
                .ok_or_else(|| anyhow::anyhow!("bad target"))?;
            let offer = Body::sdp("v=0\r\no=alice 1 1 IN IP4 192.0.2.1\r\ns=-\r\n");
            let request = core.make_outgoing_request(
                Method::Invite,
                target,
                RequestOptions::default().with_body(offer),
            );
            InviteUac::send(core, request, Box::new(Caller { established: established_tx }))?;
            Ok(())
        })
        .await??;

    let session = established
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("call never answered"))?;
    println!("alice: in call {}", session.id());

    alice
        .execute(move |core| session.bye(core, None).map(|_| ()))
        .await??;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    alice.shutdown()?;
    bob.shutdown()?;
    let alice_core = alice_task.await?;
    let bob_core = bob_task.await?;
    println!(
        "sessions left: alice {}, bob {}",
        alice_core.session_ids().len(),
        bob_core.session_ids().len()
    );
    Ok(())
}

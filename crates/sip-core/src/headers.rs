// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::slice::Iter;

use smol_str::SmolStr;

/// Represents a single SIP header field as a name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: SmolStr,
    pub value: SmolStr,
}

/// Collection of SIP headers preserving insertion order.
///
/// Lookups ignore ASCII case and understand the RFC 3261 §7.3.3 compact
/// forms for the fields the core reads (`v`, `f`, `t`, `i`, `m`, `c`, `l`,
/// `o`, `k`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

fn compact_form(name: &str) -> Option<&'static str> {
    let full = match name.to_ascii_lowercase().as_str() {
        "via" => "v",
        "from" => "f",
        "to" => "t",
        "call-id" => "i",
        "contact" => "m",
        "content-type" => "c",
        "content-length" => "l",
        "event" => "o",
        "supported" => "k",
        _ => return None,
    };
    Some(full)
}

fn name_matches(stored: &str, wanted: &str) -> bool {
    stored.eq_ignore_ascii_case(wanted)
        || compact_form(wanted).is_some_and(|short| stored.eq_ignore_ascii_case(short))
}

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header to the collection.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Inserts a header in front of every other header.
    ///
    /// Used for Via, where the topmost value identifies the transaction.
    pub fn push_front(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.insert(
            0,
            Header {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    /// Replaces every header of this name with a single value, keeping the
    /// position of the first occurrence when there was one.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|h| name_matches(&h.name, &name)) {
            Some(index) => {
                self.0[index] = Header {
                    name: name.clone(),
                    value,
                };
                let mut seen = 0usize;
                self.0.retain(|h| {
                    if name_matches(&h.name, &name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.push(name, value),
        }
    }

    /// Removes every header of this name, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !name_matches(&h.name, name));
        before - self.0.len()
    }

    /// Returns `true` when at least one header of this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| name_matches(&h.name, name))
    }

    /// Returns an iterator over the stored headers.
    pub fn iter(&self) -> Iter<'_, Header> {
        self.0.iter()
    }

    /// Returns the number of headers present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the collection does not contain any headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Finds the first header whose name matches.
    pub fn get(&self, name: &str) -> Option<&SmolStr> {
        self.0
            .iter()
            .find(|h| name_matches(&h.name, name))
            .map(|h| &h.value)
    }

    /// Returns all headers with the given name, preserving original order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SmolStr> + 'a {
        self.0
            .iter()
            .filter(move |h| name_matches(&h.name, name))
            .map(|h| &h.value)
    }

    /// Returns every comma-separated element of every header with this name.
    ///
    /// Commas inside quotes or angle brackets do not split, so name-addr
    /// lists such as Record-Route survive intact.
    pub fn get_list(&self, name: &str) -> Vec<SmolStr> {
        self.get_all(name)
            .flat_map(|value| split_list(value))
            .collect()
    }
}

/// Splits a header value on top-level commas.
pub fn split_list(value: &str) -> Vec<SmolStr> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0usize;
    for (index, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth -= 1,
            ',' if !quoted && depth == 0 => {
                let item = value[start..index].trim();
                if !item.is_empty() {
                    items.push(SmolStr::new(item));
                }
                start = index + 1;
            }
            _ => {}
        }
    }
    let tail = value[start..].trim();
    if !tail.is_empty() {
        items.push(SmolStr::new(tail));
    }
    items
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

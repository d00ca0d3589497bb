//! The persisted boot loader configuration document.
//!
//! A line-oriented key/value grammar in the legacy boot loader style:
//! global entries first, then one stanza per bootable image, introduced
//! by an `image=<path>` or `other=<device>` header.  Keys may repeat,
//! bare keys are presence flags, and values containing whitespace are
//! double-quoted.  Unrecognized entries and comments round-trip
//! losslessly.

use std::fmt::Display;

use anyhow::Result;

/// A single configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// A comment (or blank) line, stored verbatim
    Comment(String),
    /// A key/value entry; `value` is `None` for bare presence flags
    Entry {
        /// Entry key
        key: String,
        /// Entry value, unquoted
        value: Option<String>,
    },
}

impl Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::Comment(text) => write!(f, "{text}"),
            Item::Entry { key, value: None } => write!(f, "{key}"),
            Item::Entry {
                key,
                value: Some(v),
            } => {
                if v.is_empty() || v.chars().any(|c| c.is_ascii_whitespace()) {
                    write!(f, "{key}=\"{v}\"")
                } else {
                    write!(f, "{key}={v}")
                }
            }
        }
    }
}

/// What a stanza boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    /// A kernel image (`image=` header)
    Image,
    /// A chainloaded foreign OS (`other=` header)
    Other,
}

impl StanzaKind {
    fn header_key(self) -> &'static str {
        match self {
            StanzaKind::Image => "image",
            StanzaKind::Other => "other",
        }
    }
}

/// One bootable entry: a header plus its own entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    /// Image or chainload entry
    pub kind: StanzaKind,
    /// Header value: kernel path for images, device path for others
    pub target: String,
    /// The stanza's entries, in file order
    pub items: Vec<Item>,
}

impl Stanza {
    /// A new stanza with no entries.
    pub fn new(kind: StanzaKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_string(),
            items: Vec::new(),
        }
    }

    /// The stanza's menu label, when set.
    pub fn label(&self) -> Option<&str> {
        get_entry(&self.items, "label")
    }

    /// First value of `key`, when present with a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        get_entry(&self.items, key)
    }

    /// Whether `key` is present at all (flag or valued).
    pub fn contains(&self, key: &str) -> bool {
        test_entry(&self.items, key)
    }

    /// Set `key`, replacing the first existing occurrence.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        set_entry(&mut self.items, key, value);
    }

    /// Remove every occurrence of `key`.
    pub fn remove(&mut self, key: &str) {
        del_entry(&mut self.items, key);
    }
}

impl Display for Stanza {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}",
            Item::Entry {
                key: self.kind.header_key().to_string(),
                value: Some(self.target.clone()),
            }
        )?;
        for item in &self.items {
            match item {
                Item::Comment(_) => writeln!(f, "{item}")?,
                Item::Entry { .. } => writeln!(f, "\t{item}")?,
            }
        }
        Ok(())
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConf {
    /// Global entries, before the first stanza
    pub globals: Vec<Item>,
    /// Per-image stanzas, in file order
    pub stanzas: Vec<Stanza>,
}

impl LoaderConf {
    /// Parse a document.  Never fails on unrecognized entries; they are
    /// carried through verbatim.
    pub fn parse(input: &str) -> Result<Self> {
        let mut doc = LoaderConf::default();
        for raw in input.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                let item = Item::Comment(line.to_string());
                match doc.stanzas.last_mut() {
                    Some(stanza) => stanza.items.push(item),
                    None => doc.globals.push(item),
                }
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), Some(unquote(v.trim()))),
                None => (line, None),
            };

            let stanza_kind = match key {
                "image" => Some(StanzaKind::Image),
                "other" => Some(StanzaKind::Other),
                _ => None,
            };
            if let (Some(kind), Some(target)) = (stanza_kind, value.as_deref()) {
                doc.stanzas.push(Stanza::new(kind, target));
                continue;
            }

            let item = Item::Entry {
                key: key.to_string(),
                value: value.map(|v| v.to_string()),
            };
            match doc.stanzas.last_mut() {
                Some(stanza) => stanza.items.push(item),
                None => doc.globals.push(item),
            }
        }
        Ok(doc)
    }

    /// First value of a global `key`, when present with a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        get_entry(&self.globals, key)
    }

    /// Whether a global `key` is present at all.
    pub fn contains(&self, key: &str) -> bool {
        test_entry(&self.globals, key)
    }

    /// Set a global `key`, replacing the first existing occurrence.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        set_entry(&mut self.globals, key, value);
    }

    /// Remove every occurrence of a global `key`.
    pub fn remove(&mut self, key: &str) {
        del_entry(&mut self.globals, key);
    }

    /// The labels of all stanzas carrying one.
    pub fn labels(&self) -> Vec<&str> {
        self.stanzas.iter().filter_map(|s| s.label()).collect()
    }

    /// Find a stanza by its label.
    pub fn stanza(&self, label: &str) -> Option<&Stanza> {
        self.stanzas.iter().find(|s| s.label() == Some(label))
    }

    /// Delete the stanza with the given label, if any.
    pub fn delete_stanza(&mut self, label: &str) {
        self.stanzas.retain(|s| s.label() != Some(label));
    }
}

impl Display for LoaderConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for item in &self.globals {
            writeln!(f, "{item}")?;
        }
        for stanza in &self.stanzas {
            write!(f, "{stanza}")?;
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn get_entry<'a>(items: &'a [Item], key: &str) -> Option<&'a str> {
    items.iter().find_map(|i| match i {
        Item::Entry { key: k, value } if k == key => value.as_deref(),
        _ => None,
    })
}

fn test_entry(items: &[Item], key: &str) -> bool {
    items
        .iter()
        .any(|i| matches!(i, Item::Entry { key: k, .. } if k == key))
}

fn set_entry(items: &mut Vec<Item>, key: &str, value: Option<&str>) {
    let new = Item::Entry {
        key: key.to_string(),
        value: value.map(|v| v.to_string()),
    };
    let existing = items
        .iter_mut()
        .find(|i| matches!(i, Item::Entry { key: k, .. } if k == key));
    match existing {
        Some(slot) => *slot = new,
        None => items.push(new),
    }
}

fn del_entry(items: &mut Vec<Item>, key: &str) {
    items.retain(|i| !matches!(i, Item::Entry { key: k, .. } if k == key));
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! API sentences: commands sent to the router and the replies it sends back

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::codec::CodecError;

/// A sequence of words, as sent on the wire
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sentence(Vec<String>);

impl Sentence {
    #[must_use]
    pub fn new(words: Vec<String>) -> Self {
        Self(words)
    }

    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Sentence {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The attribute words (`=key=value`) of a reply sentence
pub type Attributes = BTreeMap<String, String>;

// attributes whose value must never be logged
const SECRET_ATTRIBUTES: [&str; 1] = ["password"];

/// A command sentence: a command path followed by attribute and query words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    words: Vec<String>,
}

impl Command {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            words: vec![path.to_string()],
        }
    }

    /// Add an attribute word `=key=value`
    #[must_use]
    pub fn attribute(mut self, key: &str, value: impl Display) -> Self {
        self.words.push(format!("={key}={value}"));
        self
    }

    /// Restrict the properties returned for each item to `props`
    #[must_use]
    pub fn proplist(self, props: &[&str]) -> Self {
        let props = props.join(",");
        self.attribute(".proplist", props)
    }

    /// Add a query word matching items whose property `key` is greater than `value`
    #[must_use]
    pub fn query_greater(mut self, key: &str, value: impl Display) -> Self {
        self.words.push(format!("?>{key}={value}"));
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.words.first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn words(&self) -> &[String] {
        &self.words
    }
}

impl From<&Command> for Sentence {
    fn from(command: &Command) -> Self {
        Sentence(command.words.clone())
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (n, word) in self.words.iter().enumerate() {
            if n > 0 {
                write!(f, " ")?;
            }
            let secret = SECRET_ATTRIBUTES
                .iter()
                .find(|key| word.starts_with(&format!("={key}=")));
            match secret {
                Some(key) => write!(f, "={key}=******")?,
                None => write!(f, "{word}")?,
            }
        }
        Ok(())
    }
}

/// A reply sentence from the router
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// one item of data (`!re`)
    Re(Attributes),
    /// the command completed (`!done`); may carry attributes such as `ret`
    Done(Attributes),
    /// the command failed (`!trap`)
    Trap(Attributes),
    /// the router is closing the connection (`!fatal`)
    Fatal(String),
    /// the command completed without data (`!empty`, sent by newer routers)
    Empty,
}

fn parse_attributes(words: &[String]) -> Attributes {
    words
        .iter()
        .filter_map(|word| word.strip_prefix('='))
        .map(|attr| match attr.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (attr.to_string(), String::new()),
        })
        .collect()
}

impl TryFrom<Sentence> for Reply {
    type Error = CodecError;

    fn try_from(sentence: Sentence) -> Result<Self, Self::Error> {
        let Some((kind, rest)) = sentence.0.split_first() else {
            return Err(CodecError::UnexpectedReply(String::new()));
        };
        match kind.as_str() {
            "!re" => Ok(Reply::Re(parse_attributes(rest))),
            "!done" => Ok(Reply::Done(parse_attributes(rest))),
            "!trap" => Ok(Reply::Trap(parse_attributes(rest))),
            "!empty" => Ok(Reply::Empty),
            "!fatal" => Ok(Reply::Fatal(
                rest.iter()
                    .filter(|w| !w.starts_with('.'))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
            )),
            other => Err(CodecError::UnexpectedReply(other.to_string())),
        }
    }
}

//! Command dispatch.
//!
//! Both dispatchers share one contract: tokenize the line, find the longest
//! registered command matching the leading tokens, enforce its policy and
//! hand the remaining tokens to the handler.

mod chat;
mod game;
mod tokenize;

pub use chat::{ChatCommand, ChatDispatcher};
pub use game::{parse_log_line, GameCommand, GameDispatcher, LogSay};
pub use tokenize::tokenize;

use std::collections::HashMap;

/// Permission mask that admits every invoker.
pub const ANYONE: i64 = -1;

/// Whether an invoker with `actual` bits may run a command requiring `required`.
pub fn permitted(required: i64, actual: i64) -> bool {
    required == ANYONE || actual & required != 0
}

/// A registered command and its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry<H> {
    pub handler: H,
    /// Required permission bits, or [`ANYONE`].
    pub permissions: i64,
    /// May be invoked from a direct-message channel.
    pub dm_allowed: bool,
}

#[derive(Debug)]
struct Node<H> {
    children: HashMap<String, Node<H>>,
    entry: Option<CommandEntry<H>>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            entry: None,
        }
    }
}

/// Prefix trie from command words to entries.
#[derive(Debug)]
pub struct CommandTrie<H> {
    root: Node<H>,
}

impl<H> Default for CommandTrie<H> {
    fn default() -> Self {
        Self {
            root: Node::default(),
        }
    }
}

impl<H> CommandTrie<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `verb` (one or more space-separated words).
    pub fn insert(&mut self, verb: &str, entry: CommandEntry<H>) {
        let mut node = &mut self.root;
        for word in verb.split_whitespace() {
            node = node.children.entry(word.to_lowercase()).or_default();
        }
        node.entry = Some(entry);
    }

    /// Longest registered prefix of `tokens`, with the residual arguments.
    pub fn lookup<'t>(&self, tokens: &'t [String]) -> Option<(&CommandEntry<H>, &'t [String])> {
        let mut node = &self.root;
        let mut best = None;

        for (depth, token) in tokens.iter().enumerate() {
            let Some(next) = node.children.get(token) else {
                break;
            };
            node = next;
            if let Some(entry) = &node.entry {
                best = Some((entry, &tokens[depth + 1..]));
            }
        }

        best
    }
}

/// Strip `prefix` from the first token. `None` when it does not carry it.
pub(crate) fn strip_prefix(mut tokens: Vec<String>, prefix: &str) -> Option<Vec<String>> {
    if prefix.is_empty() {
        return Some(tokens);
    }
    let first = tokens.first_mut()?;
    let stripped = first.strip_prefix(prefix)?.to_string();
    if stripped.is_empty() {
        tokens.remove(0);
    } else {
        *first = stripped;
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(handler: &'static str) -> CommandEntry<&'static str> {
        CommandEntry {
            handler,
            permissions: ANYONE,
            dm_allowed: true,
        }
    }

    fn words(text: &str) -> Vec<String> {
        tokenize(text)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut trie = CommandTrie::new();
        trie.insert("update", entry("update"));
        trie.insert("update server", entry("update-server"));

        let tokens = words("update server pug1");
        let (found, args) = trie.lookup(&tokens).expect("match");
        assert_eq!(found.handler, "update-server");
        assert_eq!(args, ["pug1"]);

        let tokens = words("update v1.2.0");
        let (found, args) = trie.lookup(&tokens).expect("match");
        assert_eq!(found.handler, "update");
        assert_eq!(args, ["v1.2.0"]);
    }

    #[test]
    fn test_partial_multiword_does_not_match() {
        let mut trie = CommandTrie::new();
        trie.insert("send password", entry("send-password"));

        assert!(trie.lookup(&words("send")).is_none());
        assert!(trie.lookup(&words("send it")).is_none());
        assert!(trie.lookup(&words("password")).is_none());
        assert!(trie.lookup(&[]).is_none());
    }

    #[rstest]
    #[case(ANYONE, 0, true)]
    #[case(8, 8, true)]
    #[case(8, 0x2f, true)]
    #[case(8, 0x20, false)]
    #[case(8, 0, false)]
    fn test_permitted(#[case] required: i64, #[case] actual: i64, #[case] expected: bool) {
        assert_eq!(permitted(required, actual), expected);
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix(words("!report x"), "!"), Some(words("report x")));
        assert_eq!(strip_prefix(words("! report"), "!"), Some(words("report")));
        assert_eq!(strip_prefix(words("report"), "!"), None);
        assert_eq!(strip_prefix(words("book"), ""), Some(words("book")));
    }
}

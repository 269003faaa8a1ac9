//! Command Registry
//!
//! Maps inbound chat messages to command handlers.
//! Exact names and aliases win; otherwise prefix commands are tried
//! in registration order and the first match is returned.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Trim and collapse whitespace runs so equivalent messages share a cache key
pub fn normalize_message(message: &str) -> String {
    WHITESPACE.replace_all(message.trim(), " ").into_owned()
}

/// A command handler. May block on network I/O; runs on the worker pool.
///
/// An empty reply means "nothing to say" and is not an error.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, room: &str, sender: &str, message: &str) -> anyhow::Result<String>;
}

impl<F> CommandHandler for F
where
    F: Fn(&str, &str, &str) -> anyhow::Result<String> + Send + Sync,
{
    fn handle(&self, room: &str, sender: &str, message: &str) -> anyhow::Result<String> {
        self(room, sender, message)
    }
}

pub type SharedHandler = Arc<dyn CommandHandler>;

/// Registration entry for a command
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub is_prefix: bool,
    pub admin_only: bool,
    pub requires_enabled_room: bool,
    handler: SharedHandler,
}

impl CommandSpec {
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&str, &str, &str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self::with_handler(name, handler)
    }

    pub fn with_handler<H>(name: &str, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            aliases: Vec::new(),
            is_prefix: false,
            admin_only: false,
            requires_enabled_room: true,
            handler: Arc::new(handler),
        }
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    /// Match any message starting with the command name
    pub fn prefix(mut self) -> Self {
        self.is_prefix = true;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    /// Allow the command in rooms that are not on the allow list
    pub fn any_room(mut self) -> Self {
        self.requires_enabled_room = false;
        self
    }

    fn resolved(&self) -> ResolvedCommand {
        ResolvedCommand {
            command_id: self.name.clone(),
            display_name: self.display_name.clone(),
            requires_admin: self.admin_only,
            requires_enabled_room: self.requires_enabled_room,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("is_prefix", &self.is_prefix)
            .field("admin_only", &self.admin_only)
            .finish()
    }
}

/// Result of resolving a message
#[derive(Clone)]
pub struct ResolvedCommand {
    pub command_id: String,
    pub display_name: String,
    pub requires_admin: bool,
    pub requires_enabled_room: bool,
    pub handler: SharedHandler,
}

impl fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("command_id", &self.command_id)
            .field("requires_admin", &self.requires_admin)
            .field("requires_enabled_room", &self.requires_enabled_room)
            .finish()
    }
}

/// Anything that can turn a message into a command
pub trait CommandResolver: Send + Sync {
    fn resolve(&self, message: &str) -> Option<ResolvedCommand>;
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
    exact: HashMap<String, usize>,
    prefixes: Vec<usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec) -> &mut Self {
        let index = self.commands.len();

        for name in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            if self.exact.insert(name.clone(), index).is_some() {
                debug!("Command name re-registered: {}", name);
            }
        }
        if spec.is_prefix {
            self.prefixes.push(index);
        }

        self.commands.push(spec);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered command ids in registration order
    pub fn command_ids(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }
}

impl CommandResolver for CommandRegistry {
    fn resolve(&self, message: &str) -> Option<ResolvedCommand> {
        let message = normalize_message(message);
        if message.is_empty() {
            return None;
        }

        if let Some(&index) = self.exact.get(&message) {
            return Some(self.commands[index].resolved());
        }

        self.prefixes
            .iter()
            .map(|&index| &self.commands[index])
            .find(|cmd| message.starts_with(cmd.name.as_str()))
            .map(CommandSpec::resolved)
    }
}

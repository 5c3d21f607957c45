//! FTP Command parsing
//!
//! Maps command tokens to factories. A line is matched against the longest
//! registered token that it starts with (case-insensitively) and that ends
//! at whitespace or end of line; the rest of the line is the argument.

use std::sync::Arc;

use crate::protocol::commands::FtpCommand;

/// Builds a command object from its argument tail.
pub type CommandFactory = fn(&str) -> Arc<dyn FtpCommand>;

#[derive(Default, Clone)]
pub struct CommandRegistry {
    // Sorted longest token first
    entries: Vec<(String, CommandFactory)>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: &str, factory: CommandFactory) {
        let token = token.to_ascii_uppercase();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.push((token, factory));
        self.entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn with(mut self, token: &str, factory: CommandFactory) -> Self {
        self.register(token, factory);
        self
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    /// Parses a control line into a command, or `None` if no token matches.
    pub fn parse(&self, line: &str) -> Option<Arc<dyn FtpCommand>> {
        let line = line.trim();
        self.entries.iter().find_map(|(token, factory)| {
            let head = line.get(..token.len())?;
            let rest = &line[token.len()..];
            (head.eq_ignore_ascii_case(token) && (rest.is_empty() || rest.starts_with(char::is_whitespace)))
                .then(|| factory(rest.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::state::SessionContext;
    use crate::protocol::commands::CommandResult;

    struct Named(&'static str, String);

    impl FtpCommand for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn execute(&self, _: &mut SessionContext) -> CommandResult {
            CommandResult::success(self.1.clone())
        }
    }

    fn site(arg: &str) -> Arc<dyn FtpCommand> {
        Arc::new(Named("SITE", arg.to_string()))
    }

    fn site_charset(arg: &str) -> Arc<dyn FtpCommand> {
        Arc::new(Named("SITE CHARSET", arg.to_string()))
    }

    fn stor(arg: &str) -> Arc<dyn FtpCommand> {
        Arc::new(Named("STOR", arg.to_string()))
    }

    fn registry() -> CommandRegistry {
        CommandRegistry::new()
            .with("SITE", site)
            .with("site charset", site_charset)
            .with("STOR", stor)
    }

    #[test]
    fn longest_token_wins() {
        let registry = registry();
        let cmd = registry.parse("site CHARSET utf-8").unwrap();
        assert_eq!(cmd.name(), "SITE CHARSET");
        let cmd = registry.parse("SITE HELP").unwrap();
        assert_eq!(cmd.name(), "SITE");
    }

    #[test]
    fn tokens_must_end_at_whitespace() {
        let registry = registry();
        assert!(registry.parse("STORE file").is_none());
        assert!(registry.parse("STOR").is_some());
        assert!(registry.parse("stor\tfile.txt").is_some());
        assert!(registry.parse("").is_none());
        assert!(registry.parse("ST\u{e9}R x").is_none());
    }
}

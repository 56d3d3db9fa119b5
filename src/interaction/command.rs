//! Text commands understood in topics and direct messages.

/// A command written by a duty inside a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCommand {
    Close,
    Release,
    Reopen,
}

/// A command written by an employee (or a duty) in a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectCommand {
    Close,
    Cancel,
    /// Lists the closed questions the sender may still reopen.
    Reopenable,
}

/// Returns the command word if `text` is a single `!word`.
fn command_word(text: &str) -> Option<String> {
    let word = text.trim().strip_prefix('!')?;

    if word.is_empty() || word.contains(char::is_whitespace) {
        return None;
    }

    Some(word.to_ascii_lowercase())
}

impl TopicCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match command_word(text)?.as_str() {
            "close" => Some(TopicCommand::Close),
            "release" => Some(TopicCommand::Release),
            "reopen" => Some(TopicCommand::Reopen),
            _ => None,
        }
    }
}

impl DirectCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match command_word(text)?.as_str() {
            "close" => Some(DirectCommand::Close),
            "cancel" => Some(DirectCommand::Cancel),
            "reopenable" => Some(DirectCommand::Reopenable),
            _ => None,
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_topic_commands() {
        assert_eq!(TopicCommand::parse("!close"), Some(TopicCommand::Close));
        assert_eq!(TopicCommand::parse("  !Release \n"), Some(TopicCommand::Release));
        assert_eq!(TopicCommand::parse("!reopen"), Some(TopicCommand::Reopen));
        assert_eq!(TopicCommand::parse("!cancel"), None);
    }

    #[test]
    fn parses_direct_commands() {
        assert_eq!(DirectCommand::parse("!cancel"), Some(DirectCommand::Cancel));
        assert_eq!(DirectCommand::parse("!CLOSE"), Some(DirectCommand::Close));
        assert_eq!(DirectCommand::parse("!reopenable"), Some(DirectCommand::Reopenable));
        assert_eq!(DirectCommand::parse("!release"), None);
    }

    #[test]
    fn ordinary_text_is_not_a_command() {
        assert_eq!(TopicCommand::parse("please !close this"), None);
        assert_eq!(TopicCommand::parse("!close now"), None);
        assert_eq!(DirectCommand::parse("!"), None);
        assert_eq!(DirectCommand::parse("cancel"), None);
    }
}

//! Text templates for notices posted by the desk.
//!
//! The engine only produces structured [`Notice`] values; transports call
//! [`render`] to turn them into Slack-flavoured markdown.

use super::types::{CloseReason, Notice, QuestionStats};

/// Marker posted into a topic when its thread is closed.
pub const THREAD_CLOSED: &str = ":lock: *This topic is closed.* Messages here are no longer delivered.";

/// Marker posted into a topic when its thread is reopened.
pub const THREAD_REOPENED: &str = ":unlock: *This topic is open again.*";

/// Reaction placed on the root message of a closed topic.
pub const CLOSED_REACTION: &str = "lock";

fn stats_line(label: &str, stats: &QuestionStats) -> String {
    format!("> *{label}:* today {} / last 30 days {}", stats.today, stats.last_month)
}

/// First line of a question, shortened for listings.
fn excerpt(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();

    match line.char_indices().nth(80) {
        Some((end, _)) => format!("{}…", &line[..end]),
        None => line.to_string(),
    }
}

/// Renders a notice into message text.
pub fn render(notice: &Notice) -> String {
    match notice {
        Notice::NewQuestion { employee, text, stats } => {
            format!("*New question from {employee}*\n\n> {text}\n\n{}", stats_line("Questions", stats))
        }
        Notice::QuestionAccepted { token } => {
            format!("*:white_check_mark: Question received*\n\nA duty will pick it up shortly. Reference: `{token}`.\nSend `!cancel` to withdraw it before it is picked up.")
        }
        Notice::SupervisorUnavailable { supervisor } => {
            format!("*:warning: Heads up*\n\n{supervisor} is not on today's roster, so answers may take longer than usual.")
        }
        Notice::Claimed { duty, stats } => {
            format!("*:cop: Question in progress*\n\n*{duty}* is handling this question.\n{}", stats_line("Resolved", stats))
        }
        Notice::Released { duty } => {
            format!("*:dove_of_peace: Question released*\n\n*{duty}* stepped away. The question is waiting for another duty; write in the topic to pick it up.")
        }
        Notice::Closed { reason } => match reason {
            CloseReason::Duty(name) => format!("*:lock: Question closed*\n\n*{name}* closed the question."),
            CloseReason::Employee(name) => format!("*:lock: Question closed*\n\n*{name}* closed the question."),
            CloseReason::Inactivity => "*:lock: Question closed*\n\nThe question was closed due to inactivity.".to_string(),
        },
        Notice::Reopened { duty, text } => {
            format!("*:unlock: Question reopened*\n\n*{duty}* reopened the question:\n> {text}")
        }
        Notice::Cancelled => "*:fire: Question cancelled*\n\nThe employee withdrew the question.".to_string(),
        Notice::InactivityReleased => "*:hourglass: Question released*\n\nNo activity for a while, so the question went back to the open pool.".to_string(),
        Notice::Relay { from, text } => format!("*{from}:* {text}"),
        Notice::Rejected { reason } => format!("*:warning: Not delivered*\n\n{reason}"),
        Notice::Reopenable { questions } if questions.is_empty() => "*Reopenable questions*\n\nNothing you closed recently can be reopened.".to_string(),
        Notice::Reopenable { questions } => {
            let lines = questions
                .iter()
                .map(|q| format!("• `{}` from {}: {}", q.token, q.employee_fullname, excerpt(&q.question_text)))
                .collect::<Vec<_>>()
                .join("\n");

            format!("*Reopenable questions*\n\n{lines}\n\nWrite `!reopen` in a topic to reopen it.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactivity_close_is_distinguishable() {
        let manual = render(&Notice::Closed {
            reason: CloseReason::Duty("Alice".to_string()),
        });
        let timeout = render(&Notice::Closed { reason: CloseReason::Inactivity });

        assert!(manual.contains("Alice"));
        assert!(timeout.contains("inactivity"));
        assert_ne!(manual, timeout);
    }
}

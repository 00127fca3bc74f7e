//! `recall chat`: inspect and append to session histories.

use anyhow::{bail, Result};

use recall_harness_core::models::{Message, Role};

use crate::config::Config;
use crate::harness::Harness;

pub async fn run_chat_show(config: &Config, session: &str) -> Result<()> {
    let harness = Harness::open(config).await?;
    let messages = harness.chat_history().get_messages(session).await?;

    if messages.is_empty() {
        println!("(empty)");
    } else {
        for message in &messages {
            println!("{}: {}", message.role, message.content);
        }
    }

    harness.close().await;
    Ok(())
}

pub async fn run_chat_say(config: &Config, session: &str, text: &str, role: &str) -> Result<()> {
    let role = parse_role(role)?;
    let harness = Harness::open(config).await?;
    harness
        .chat_history()
        .add_message(session, Message::new(role, text))
        .await?;
    println!("ok");
    harness.close().await;
    Ok(())
}

pub async fn run_chat_clear(config: &Config, session: &str) -> Result<()> {
    let harness = Harness::open(config).await?;
    harness.chat_history().clear(session).await?;
    println!("cleared session {}", session);
    harness.close().await;
    Ok(())
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "human" | "user" => Ok(Role::Human),
        "ai" | "assistant" => Ok(Role::Ai),
        "system" => Ok(Role::System),
        other => bail!("Unknown role: '{}'. Use human, ai, or system.", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_aliases() {
        assert_eq!(parse_role("user").unwrap(), Role::Human);
        assert_eq!(parse_role("assistant").unwrap(), Role::Ai);
        assert_eq!(parse_role("system").unwrap(), Role::System);
        assert!(parse_role("robot").is_err());
    }
}

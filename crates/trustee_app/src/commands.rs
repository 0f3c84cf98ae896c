//! Line commands read from stdin.
//!
//! ```text
//! create <id> <abb-url> <start> <end> <question...>   times in RFC 3339
//! init <id> <path>
//! verify <id>
//! erase <id>
//! erase-all
//! cancel <id>
//! notifications on|off
//! quit
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use chrono::DateTime;
use trustee_core::{Command, DataSource, NewElection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    Command(Command),
    ShowNotifications(bool),
    Quit,
}

/// Parses one line. Blank lines and `#` comments yield `None`.
pub(crate) fn parse_line(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let mut arg = |name: &str| {
        words
            .next()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("{verb}: missing {name}"))
    };

    let input = match verb {
        "create" => {
            let election_id = arg("election id")?;
            let abb_url = arg("abb url")?;
            let start_time = millis(&arg("start time")?)?;
            let end_time = millis(&arg("end time")?)?;
            let question = words.collect::<Vec<_>>().join(" ");
            if question.is_empty() {
                bail!("create: missing question");
            }
            Input::Command(Command::Create {
                election_id,
                election: NewElection {
                    question,
                    start_time,
                    end_time,
                    abb_url,
                },
            })
        }
        "init" => Input::Command(Command::Initialize {
            election_id: arg("election id")?,
            source: DataSource::File(PathBuf::from(arg("path")?)),
        }),
        "verify" => Input::Command(Command::Verify {
            election_id: arg("election id")?,
        }),
        "erase" => Input::Command(Command::Erase {
            election_id: arg("election id")?,
        }),
        "erase-all" => Input::Command(Command::EraseAll),
        "cancel" => Input::Command(Command::Cancel {
            election_id: arg("election id")?,
        }),
        "notifications" => match arg("on|off")?.as_str() {
            "on" => Input::ShowNotifications(true),
            "off" => Input::ShowNotifications(false),
            other => bail!("notifications: expected on or off, got {other:?}"),
        },
        "quit" | "exit" => Input::Quit,
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(input))
}

fn millis(text: &str) -> anyhow::Result<i64> {
    let time = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("{text:?} is not an RFC 3339 time"))?;
    Ok(time.timestamp_millis())
}

//! Argument parsing and command execution

use std::sync::Arc;

use sc_contacts::{ContactsBridge, FetchSummary, NormalizedContact};
use serde::Serialize;

/// What to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print the current permission grade
    Check,
    /// Prompt for permission if undecided
    Request,
    /// Fetch every contact
    Contacts,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub summary: bool,
    pub demo: Option<usize>,
    pub vcard_path: Option<String>,
}

#[derive(Serialize)]
struct ContactsWithSummary<'a> {
    contacts: &'a [NormalizedContact],
    summary: &'a FetchSummary,
}

#[derive(Serialize)]
struct Permission {
    permission: sc_contacts::PermissionGrade,
}

/// Parse command line arguments (program name already skipped)
pub fn parse_args<I>(args: I) -> Result<Invocation, String>
where
    I: IntoIterator<Item = String>,
{
    let mut invocation = Invocation {
        command: Command::Help,
        summary: false,
        demo: None,
        vcard_path: None,
    };
    let mut command = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(with_command(invocation, Command::Help)),
            "--version" | "-v" => return Ok(with_command(invocation, Command::Version)),
            "--summary" | "-s" => invocation.summary = true,
            "--demo" => {
                let count = args.next().ok_or("--demo needs a record count")?;
                let count = count
                    .parse()
                    .map_err(|_| format!("Invalid record count: {}", count))?;
                invocation.demo = Some(count);
            }
            "--file" | "-f" => {
                invocation.vcard_path = Some(args.next().ok_or("--file needs a path")?);
            }
            "check" | "request" | "contacts" if command.is_none() => {
                command = Some(match arg.as_str() {
                    "check" => Command::Check,
                    "request" => Command::Request,
                    _ => Command::Contacts,
                });
            }
            other => return Err(format!("Unexpected argument: {}", other)),
        }
    }

    if let Some(command) = command {
        invocation.command = command;
    }
    if invocation.summary && invocation.command != Command::Contacts {
        return Err("--summary only applies to contacts".to_string());
    }

    Ok(invocation)
}

fn with_command(mut invocation: Invocation, command: Command) -> Invocation {
    invocation.command = command;
    invocation
}

/// Run a command and render its result as pretty JSON
pub async fn run(bridge: &Arc<ContactsBridge>, invocation: &Invocation) -> anyhow::Result<String> {
    let json = match invocation.command {
        Command::Check => {
            let permission = bridge.check_permission();
            serde_json::to_string_pretty(&Permission { permission })?
        }
        Command::Request => {
            let permission = bridge
                .request_permission()
                .await
                .map_err(|e| anyhow::anyhow!("{} [{}]", e, e.code()))?;
            serde_json::to_string_pretty(&Permission { permission })?
        }
        Command::Contacts => {
            let output = bridge
                .get_contacts_with_summary()
                .await
                .map_err(|e| anyhow::anyhow!("{} [{}]", e, e.code()))?;

            if invocation.summary {
                serde_json::to_string_pretty(&ContactsWithSummary {
                    contacts: &output.contacts,
                    summary: &output.summary,
                })?
            } else {
                serde_json::to_string_pretty(&output.contacts)?
            }
        }
        Command::Help | Command::Version => String::new(),
    };

    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_contacts::store::synthetic_records;
    use sc_contacts::{AuthorizationStatus, MemoryStore, VcardStore};
    use sc_core::Config;
    use std::io::Write;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_args(args("")).unwrap().command, Command::Help);
        assert_eq!(parse_args(args("check")).unwrap().command, Command::Check);
        assert_eq!(parse_args(args("request --demo 3")).unwrap().demo, Some(3));
        assert_eq!(parse_args(args("contacts -v")).unwrap().command, Command::Version);

        let invocation = parse_args(args("contacts --summary --file book.vcf")).unwrap();
        assert_eq!(invocation.command, Command::Contacts);
        assert!(invocation.summary);
        assert_eq!(invocation.vcard_path.as_deref(), Some("book.vcf"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args("contacts --demo")).is_err());
        assert!(parse_args(args("contacts --demo many")).is_err());
        assert!(parse_args(args("check --summary")).is_err());
        assert!(parse_args(args("check contacts")).is_err());
        assert!(parse_args(args("--bogus")).is_err());
    }

    fn invocation(command: Command, summary: bool) -> Invocation {
        Invocation {
            command,
            summary,
            demo: None,
            vcard_path: None,
        }
    }

    #[tokio::test]
    async fn test_contacts_json() {
        let bridge = Arc::new(ContactsBridge::new(
            Arc::new(MemoryStore::new(synthetic_records(3))),
            &Config::default(),
        ));

        let json = run(&bridge, &invocation(Command::Contacts, false)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert!(value[0]["recordId"].is_string());

        let json = run(&bridge, &invocation(Command::Contacts, true)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["delivered"], 3);
    }

    #[tokio::test]
    async fn test_denied_prints_empty_list() {
        let store = MemoryStore::new(synthetic_records(3)).with_status(AuthorizationStatus::Denied);
        let bridge = Arc::new(ContactsBridge::new(Arc::new(store), &Config::default()));

        let json = run(&bridge, &invocation(Command::Contacts, false)).await.unwrap();
        assert_eq!(json, "[]");

        let json = run(&bridge, &invocation(Command::Check, false)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["permission"], "denied");
    }

    #[tokio::test]
    async fn test_vcard_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:42\r\nN:Hopper;Grace;;;\r\nTEL;TYPE=CELL:+1 555 0100\r\nEND:VCARD\r\n"
        )
        .unwrap();

        let store = VcardStore::open(file.path()).unwrap();
        let bridge = Arc::new(ContactsBridge::new(Arc::new(store), &Config::default()));

        let json = run(&bridge, &invocation(Command::Contacts, false)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["recordId"], "42");
        assert_eq!(value[0]["displayName"], "Grace Hopper");
        assert_eq!(value[0]["phoneNumbers"][0]["label"], "cell");
    }
}

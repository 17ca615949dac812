use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use charcard::card::CharacterCardV2;
use charcard::config::Config;
use charcard::db::{CardOrder, CardType};
use charcard::import::{Importer, UreqClient};
use charcard::logging;
use charcard::macros::{expand, MacroContext};
use charcard::repository::CardRepository;
use charcard::session::Session;

#[derive(Debug, PartialEq)]
enum Command {
    List { user: bool, modified: bool },
    Show(i64),
    New { name: String, user: bool },
    Import(String),
    ImportFile(Vec<PathBuf>),
    Duplicate(i64),
    Delete(i64),
    Export(i64, PathBuf),
    Expand { user_id: i64, char_id: i64, text: String },
}

fn parse_args() -> (Option<PathBuf>, Command) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("charcard {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" if rest.is_empty() => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    match parse_command(&rest) {
        Ok(command) => (config_path, command),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_id(value: Option<&String>, what: &str) -> Result<i64> {
    let value = value.with_context(|| format!("missing {}", what))?;
    value
        .parse()
        .with_context(|| format!("{} must be a number, got {:?}", what, value))
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("no command given");
    };
    let has_flag = |flag: &str| rest.iter().any(|a| a == flag);

    let command = match name.as_str() {
        "list" => Command::List {
            user: has_flag("--user"),
            modified: has_flag("--modified"),
        },
        "show" => Command::Show(parse_id(rest.first(), "card id")?),
        "new" => {
            let name = rest
                .iter()
                .find(|a| !a.starts_with("--"))
                .context("missing card name")?;
            Command::New {
                name: name.clone(),
                user: has_flag("--user"),
            }
        }
        "import" => Command::Import(rest.first().context("missing identifier or URL")?.clone()),
        "import-file" => {
            if rest.is_empty() {
                bail!("missing image path");
            }
            Command::ImportFile(rest.iter().map(PathBuf::from).collect())
        }
        "duplicate" => Command::Duplicate(parse_id(rest.first(), "card id")?),
        "delete" => Command::Delete(parse_id(rest.first(), "card id")?),
        "export" => Command::Export(
            parse_id(rest.first(), "card id")?,
            PathBuf::from(rest.get(1).context("missing destination path")?),
        ),
        "expand" => Command::Expand {
            user_id: parse_id(rest.first(), "user card id")?,
            char_id: parse_id(rest.get(1), "character card id")?,
            text: rest.get(2).context("missing text")?.clone(),
        },
        other => bail!("unknown command {:?}", other),
    };
    Ok(command)
}

fn print_help() {
    println!(
        r#"charcard - character card library

USAGE:
    charcard [OPTIONS] <COMMAND>

COMMANDS:
    list [--user] [--modified]       List characters (or user personas)
    show <id>                        Print a card as JSON
    new <name> [--user]              Create an empty card
    import <uuid|owner/name|url>     Import from Pygmalion or Chub
    import-file <path>...            Import PNG files with embedded cards
    duplicate <id>                   Copy a card and its avatar
    delete <id>                      Delete a card and its avatar
    export <id> <dest.png>           Write the avatar with the card embedded
    expand <user-id> <char-id> <text>
                                     Expand {{{{user}}}}/{{{{char}}}} macros in text

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CHARCARD_CONFIG     Path to config file (overrides default location)
    CHARCARD_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/charcard/config.toml"#
    );
}

fn run(command: Command, config: &Config, repo: &CardRepository, importer: &Importer) -> Result<()> {
    match command {
        Command::List { user, modified } => {
            let card_type = if user { CardType::User } else { CardType::Character };
            let order = if modified { CardOrder::Modified } else { CardOrder::Id };
            for card in repo.list_cards(card_type, order)? {
                let tags = if card.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", card.tags.join(", "))
                };
                println!("{:>6}  {}{}", card.id, card.name, tags);
                if let (Some(name), Some(swipe)) = (&card.latest_name, &card.latest_swipe) {
                    println!("        {}: {}", name, swipe.lines().next().unwrap_or_default());
                }
            }
        }
        Command::Show(id) => {
            let card = repo.get_card(id)?.with_context(|| format!("Card {} not found", id))?;
            println!("# {} card {}, avatar {}", card.card_type, id, repo.image_path(card.image_id).display());
            println!("{}", serde_json::to_string_pretty(&CharacterCardV2::from(&card))?);
        }
        Command::New { name, user } => {
            let card_type = if user { CardType::User } else { CardType::Character };
            println!("{}", repo.create_card(&name, card_type)?);
        }
        Command::Import(input) => match importer.import_from_text(&input) {
            Some(id) => println!("Imported card {}", id),
            None => bail!("Import of {:?} failed, see log for details", input),
        },
        Command::ImportFile(paths) => {
            let ids = importer.import_images(&paths);
            println!("Imported {} of {} files", ids.len(), paths.len());
            for id in ids {
                println!("{}", id);
            }
        }
        Command::Duplicate(id) => match repo.duplicate_card(id)? {
            Some(new_id) => println!("{}", new_id),
            None => bail!("Card {} could not be duplicated", id),
        },
        Command::Delete(id) => {
            if !repo.exists(id)? {
                bail!("Card {} not found", id);
            }
            repo.delete_card(id)?;
        }
        Command::Export(id, dest) => {
            if !repo.export_card_png(id, &dest)? {
                bail!("Card {} not found", id);
            }
            println!("Wrote {}", dest.display());
        }
        Command::Expand { user_id, char_id, text } => {
            let session_path = config.session_path();
            let mut session = Session::restore(&session_path, repo)?;
            let user = session
                .user
                .set_card(repo, user_id)?
                .with_context(|| format!("User card {} not found", user_id))?;
            let character = session
                .character
                .set_card(repo, char_id)?
                .with_context(|| format!("Character card {} not found", char_id))?;
            session.save(&session_path)?;

            println!("{}", expand(Some(&text), &MacroContext::new(user, character)));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let (config_path, command) = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    if let Err(e) = logging::init(Some(Config::config_dir().join("logs"))) {
        eprintln!("Warning: logging unavailable: {:#}", e);
    }

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let repo = CardRepository::open(&config)?;
    let http = UreqClient::new(config.remote.timeout_secs);
    let importer = Importer::from_config(&repo, &http, &config);
    if let Some(id) = importer.ensure_default_card() {
        tracing::info!(id, "Seeded default character");
    }

    run(command, &config, &repo, &importer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_list_flags() {
        assert_eq!(
            parse_command(&args(&["list", "--modified"])).unwrap(),
            Command::List { user: false, modified: true }
        );
    }

    #[test]
    fn test_parse_new_user() {
        assert_eq!(
            parse_command(&args(&["new", "--user", "Me"])).unwrap(),
            Command::New { name: "Me".to_string(), user: true }
        );
    }

    #[test]
    fn test_parse_expand() {
        assert_eq!(
            parse_command(&args(&["expand", "1", "2", "Hi {{char}}"])).unwrap(),
            Command::Expand { user_id: 1, char_id: 2, text: "Hi {{char}}".to_string() }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command(&args(&[])).is_err());
        assert!(parse_command(&args(&["show", "abc"])).is_err());
        assert!(parse_command(&args(&["export", "3"])).is_err());
        assert!(parse_command(&args(&["frobnicate"])).is_err());
    }
}

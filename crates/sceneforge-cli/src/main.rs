use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sceneforge_contracts::events::EventWriter;
use sceneforge_contracts::images::{
    export_data_uri, load_image_ref, parse_data_uri, preview_data_uri, read_image_file,
};
use sceneforge_contracts::messages;
use sceneforge_contracts::storage::{LocalStore, SavedImages};
use sceneforge_contracts::StudioError;
use sceneforge_engine::{
    CommandReselector, CredentialReselector, GeminiImageModel, Studio, VARIANTS_PER_ACTION,
};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "sceneforge",
    version,
    about = "Compose character and background images into generated scenes"
)]
struct Cli {
    /// JSON file holding the local storage slots.
    #[arg(
        long,
        global = true,
        env = "SCENEFORGE_STORAGE",
        default_value = "sceneforge-storage.json"
    )]
    storage: PathBuf,
    #[arg(long, global = true, default_value = "sceneforge-events.jsonl")]
    events: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    #[command(subcommand)]
    Saved(SavedCommand),
    Preview(PreviewArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    /// Character image; repeat for several. All start selected.
    #[arg(long = "character")]
    characters: Vec<PathBuf>,
    /// 1-based character position to leave out of this generation.
    #[arg(long)]
    deselect: Vec<usize>,
    #[arg(long)]
    background: Option<PathBuf>,
    /// Keep the background loaded but do not send it.
    #[arg(long)]
    no_background: bool,
    #[arg(long, default_value = "sceneforge-out")]
    out: PathBuf,
    #[arg(long, env = "SCENEFORGE_MODEL")]
    model: Option<String>,
    /// Store every generated image in the saved gallery.
    #[arg(long)]
    save: bool,
    /// Command spawned when the API key needs to be reselected.
    #[arg(long, env = "SCENEFORGE_RESELECT_COMMAND")]
    reselect_command: Option<String>,
}

#[derive(Debug, Subcommand)]
enum SavedCommand {
    List,
    Add {
        path: PathBuf,
    },
    Delete {
        id: String,
    },
    Clear,
    Export {
        id: String,
        #[arg(long, default_value = "sceneforge-out")]
        out: PathBuf,
    },
}

#[derive(Debug, Parser)]
struct PreviewArgs {
    /// Saved image id or image file path.
    target: String,
}

const EXIT_GENERATION_FAILED: i32 = 1;
const EXIT_REJECTED: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sceneforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let events = EventWriter::new(&cli.events, session_id());
    match cli.command {
        Command::Generate(args) => run_generate(&cli.storage, events, args),
        Command::Saved(command) => run_saved(&cli.storage, events, command),
        Command::Preview(args) => run_preview(&cli.storage, args),
    }
}

fn run_generate(storage: &Path, events: EventWriter, args: GenerateArgs) -> Result<i32> {
    let model = GeminiImageModel::new(args.model.as_deref());
    let reselector = CommandReselector::probe(args.reselect_command.as_deref())
        .map(|reselector| Box::new(reselector) as Box<dyn CredentialReselector>);
    if args.reselect_command.is_some() && reselector.is_none() {
        println!("Credential reselection command is not available; continuing without it.");
    }
    let mut studio = Studio::new(Box::new(model))
        .with_reselector(reselector)
        .with_events(events.clone());

    for (idx, path) in args.characters.iter().enumerate() {
        match load_image_ref(path) {
            Ok(image) => {
                studio.state_mut().add_character(image);
            }
            Err(err) => {
                println!("Character #{}: {err}", idx + 1);
                studio.state_mut().add_empty_slot();
            }
        }
    }
    for position in &args.deselect {
        let known = position
            .checked_sub(1)
            .map(|index| studio.state_mut().set_character_selected(index, false))
            .unwrap_or(false);
        if !known {
            println!("--deselect {position}: no character at that position");
        }
    }
    if let Some(path) = args.background.as_ref() {
        match load_image_ref(path) {
            Ok(image) => studio.state_mut().set_background(Some(image)),
            Err(err) => println!("Background: {err}"),
        }
    }
    if args.no_background {
        studio.state_mut().set_use_background(false);
    }
    studio.state_mut().set_prompt(args.prompt.clone());

    println!(
        "Generating {VARIANTS_PER_ACTION} images with {}...",
        studio.model_name()
    );
    let images = match studio.generate() {
        Ok(images) => images,
        Err(err) => {
            let message = studio
                .state()
                .error()
                .map(str::to_string)
                .unwrap_or_else(|| err.user_message());
            println!("{message}");
            return Ok(match err {
                StudioError::Validation(_) => EXIT_REJECTED,
                _ => EXIT_GENERATION_FAILED,
            });
        }
    };

    let exported = export_batch(&images, &args.out, &events)?;
    for (idx, path) in exported.iter().enumerate() {
        println!("Image {}: {}", idx + 1, path.display());
    }
    if !args.save {
        return Ok(0);
    }

    let mut gallery = SavedImages::load(LocalStore::new(storage)).with_events(events.clone());
    for (idx, uri) in images.iter().enumerate() {
        if gallery.is_saved(uri) {
            println!("Image {}: {}", idx + 1, messages::ALREADY_SAVED);
            continue;
        }
        let record = gallery.save(uri)?;
        println!("Image {}: saved as {}", idx + 1, record.id);
    }
    Ok(0)
}

/// Writes every image of a batch before anything touches the gallery.
fn export_batch(images: &[String], out: &Path, events: &EventWriter) -> Result<Vec<PathBuf>> {
    let stamp = compact_timestamp();
    let mut exported = Vec::with_capacity(images.len());
    for (idx, uri) in images.iter().enumerate() {
        let path = export_data_uri(uri, out, &format!("sceneforge-{stamp}-{idx:02}"))
            .with_context(|| format!("failed to export image {}", idx + 1))?;
        record_event(
            events,
            "image_exported",
            json!({ "path": path.display().to_string() }),
        );
        exported.push(path);
    }
    Ok(exported)
}

fn run_saved(storage: &Path, events: EventWriter, command: SavedCommand) -> Result<i32> {
    let mut saved = SavedImages::load(LocalStore::new(storage)).with_events(events.clone());
    match command {
        SavedCommand::List => {
            if saved.is_empty() {
                println!("No saved images.");
                return Ok(0);
            }
            for image in saved.images() {
                let (mime_type, payload) = parse_data_uri(&image.url).unwrap_or(("unknown", ""));
                println!(
                    "{}  {}  {}  ~{} bytes",
                    image.id,
                    format_millis(image.timestamp),
                    mime_type,
                    payload.len() / 4 * 3
                );
            }
            Ok(0)
        }
        SavedCommand::Add { path } => {
            let uri = read_image_file(&path)?;
            if saved.is_saved(&uri) {
                println!("{}; storing another copy.", messages::ALREADY_SAVED);
            }
            let record = saved.save(&uri)?;
            println!("Saved {} as {}", path.display(), record.id);
            Ok(0)
        }
        SavedCommand::Delete { id } => {
            if saved.delete(&id)? {
                println!("Deleted {id}");
                Ok(0)
            } else {
                println!("No saved image with id {id}");
                Ok(1)
            }
        }
        SavedCommand::Clear => {
            let count = saved.len();
            saved.clear()?;
            println!("Cleared {count} saved images.");
            Ok(0)
        }
        SavedCommand::Export { id, out } => {
            let Some(image) = saved.get(&id) else {
                println!("No saved image with id {id}");
                return Ok(1);
            };
            let path = export_data_uri(&image.url, &out, &format!("sceneforge-{id}"))
                .with_context(|| format!("failed to export saved image {id}"))?;
            record_event(
                &events,
                "image_exported",
                json!({ "id": id, "path": path.display().to_string() }),
            );
            println!("Exported {id} to {}", path.display());
            Ok(0)
        }
    }
}

fn run_preview(storage: &Path, args: PreviewArgs) -> Result<i32> {
    let saved = SavedImages::load(LocalStore::new(storage));
    let uri = match saved.get(&args.target) {
        Some(image) => image.url.clone(),
        None => read_image_file(Path::new(&args.target))?,
    };
    let preview = preview_data_uri(&uri)?;
    println!(
        "{}  {}x{}  {} bytes",
        preview.mime_type, preview.width, preview.height, preview.byte_len
    );
    Ok(0)
}

fn record_event(events: &EventWriter, event_type: &str, payload: Value) {
    if let Err(err) = events.emit_json(event_type, payload) {
        eprintln!("sceneforge: failed to record {event_type} event: {err:#}");
    }
}

fn session_id() -> String {
    format!("session-{}", compact_timestamp())
}

fn compact_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|value| value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use sceneforge_contracts::events::EventWriter;
    use sceneforge_contracts::storage::{LocalStore, SavedImages};

    use super::{export_batch, format_millis, Cli, Command, SavedCommand};

    #[test]
    fn generate_args_collect_repeated_characters() {
        let cli = Cli::try_parse_from([
            "sceneforge",
            "generate",
            "--prompt",
            "duel at dawn",
            "--character",
            "a.png",
            "--character",
            "b.png",
            "--deselect",
            "2",
            "--background",
            "bg.jpg",
        ])
        .expect("parse");
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.prompt, "duel at dawn");
        assert_eq!(args.characters.len(), 2);
        assert_eq!(args.deselect, vec![2]);
        assert!(!args.no_background);
        assert!(!args.save);
    }

    #[test]
    fn saved_export_parses_id_and_out() {
        let cli = Cli::try_parse_from([
            "sceneforge",
            "--storage",
            "store.json",
            "saved",
            "export",
            "abc",
            "--out",
            "dl",
        ])
        .expect("parse");
        assert_eq!(cli.storage.to_str(), Some("store.json"));
        let Command::Saved(SavedCommand::Export { id, out }) = cli.command else {
            panic!("expected saved export");
        };
        assert_eq!(id, "abc");
        assert_eq!(out.to_str(), Some("dl"));
    }

    #[test]
    fn failed_export_stops_before_any_image_is_saved() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-1");
        let images = vec![
            "data:image/png;base64,AAAA".to_string(),
            "not a data uri".to_string(),
        ];

        assert!(export_batch(&images, &temp.path().join("out"), &events).is_err());
        let gallery = SavedImages::load(LocalStore::new(temp.path().join("storage.json")));
        assert!(gallery.is_empty());

        let exported = export_batch(&images[..1], &temp.path().join("out"), &events)?;
        assert_eq!(exported.len(), 1);
        assert!(exported[0].is_file());
        Ok(())
    }

    #[test]
    fn millis_render_as_utc_seconds() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00Z");
    }
}

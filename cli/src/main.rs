use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use planner::api::{AccountApi, ApiError, DesignApi, HttpClient};
use planner::doc::DesignId;
use planner::editor::{EditorState, ItemTransform, LoadOutcome, Point, SaveOutcome};
use planner::palette::{self, FURNITURE_PALETTE};
use planner::session::{AuthContext, Session};
use planner::wire::{LoginRequest, RegisterRequest};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing session token; pass --token or set ROOMCRAFT_TOKEN")]
    MissingSessionToken,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("session rejected by the server; log in again")]
    SessionEnded,
    #[error("unknown furniture type `{0}`; run `palette` for the list")]
    UnknownFurniture(String),
    #[error("no item `{0}` in this design")]
    UnknownItem(String),
    #[error("a save is already in progress")]
    SaveBusy,
    #[error("response arrived after the editor moved on")]
    Stale,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "roomcraft-cli", about = "RoomCraft design API CLI")]
struct Cli {
    #[arg(long, env = "ROOMCRAFT_BASE_URL", default_value = "http://127.0.0.1:5000")]
    base_url: String,

    #[arg(long, env = "ROOMCRAFT_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// List the furniture that can be placed.
    Palette,
    Design(DesignCommand),
}

#[derive(Args, Debug)]
struct DesignCommand {
    #[command(subcommand)]
    command: DesignSubcommand,
}

#[derive(Subcommand, Debug)]
enum DesignSubcommand {
    List,
    Show {
        design_id: DesignId,
    },
    Delete {
        design_id: DesignId,
    },
    /// Set up a new room, optionally furnish it, and save it.
    New {
        #[arg(long, default_value = planner::editor::DEFAULT_DESIGN_NAME)]
        name: String,
        #[arg(long, default_value_t = planner::doc::DEFAULT_ROOM_WIDTH)]
        width: f64,
        #[arg(long, default_value_t = planner::doc::DEFAULT_ROOM_HEIGHT)]
        height: f64,
        #[command(flatten)]
        edits: EditArgs,
    },
    /// Load a design, apply edits in order (rename, resize, place, move, rotate, remove), and save it.
    Edit {
        design_id: DesignId,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long, value_name = "WIDTHxHEIGHT")]
        resize: Option<Size>,
        #[command(flatten)]
        edits: EditArgs,
    },
}

#[derive(Args, Debug, Default)]
struct EditArgs {
    /// Drop furniture, e.g. `sofa@100,100`. Repeatable.
    #[arg(long = "place", value_name = "TYPE@X,Y")]
    place: Vec<Placement>,
    /// Move an item, e.g. `<item-id>@250,40`. Repeatable.
    #[arg(long = "move", value_name = "ITEM@X,Y")]
    moves: Vec<Placement>,
    /// Rotate an item to an absolute angle, e.g. `<item-id>=90`. Repeatable.
    #[arg(long = "rotate", value_name = "ITEM=DEGREES")]
    rotations: Vec<Rotation>,
    /// Remove an item by id. Repeatable.
    #[arg(long = "remove", value_name = "ITEM")]
    removals: Vec<String>,
}

/// `<target>@<x>,<y>`
#[derive(Debug, Clone, PartialEq)]
struct Placement {
    target: String,
    at: Point,
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (target, coords) = raw
            .rsplit_once('@')
            .ok_or_else(|| format!("expected TARGET@X,Y, got {raw:?}"))?;
        let (x, y) = coords
            .split_once(',')
            .ok_or_else(|| format!("expected X,Y after '@', got {coords:?}"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(format!("missing target in {raw:?}"));
        }
        Ok(Self { target: target.to_owned(), at: Point::new(parse_number(x)?, parse_number(y)?) })
    }
}

/// `<item>=<degrees>`
#[derive(Debug, Clone, PartialEq)]
struct Rotation {
    item: String,
    degrees: f64,
}

impl FromStr for Rotation {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (item, degrees) = raw
            .rsplit_once('=')
            .ok_or_else(|| format!("expected ITEM=DEGREES, got {raw:?}"))?;
        Ok(Self { item: item.trim().to_owned(), degrees: parse_number(degrees)? })
    }
}

/// `<width>x<height>`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Size {
    width: f64,
    height: f64,
}

impl FromStr for Size {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (width, height) = raw
            .to_ascii_lowercase()
            .split_once('x')
            .map(|(w, h)| (w.to_owned(), h.to_owned()))
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
        Ok(Self { width: parse_number(&width)?, height: parse_number(&height)? })
    }
}

fn parse_number(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("not a number: {raw:?}"))
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    token: Option<String>,
}

impl CliContext {
    fn client(&self) -> Result<HttpClient, CliError> {
        Ok(HttpClient::new(&self.base_url)?)
    }

    fn auth(&self) -> Result<AuthContext, CliError> {
        let token = self.token.as_deref().ok_or(CliError::MissingSessionToken)?;
        let mut auth = AuthContext::new();
        auth.sign_in(Session::from_token(token));
        Ok(auth)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, token: cli.token };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Register { name, email, password } => {
            let client = ctx.client()?;
            let mut auth = AuthContext::new();
            auth.register(&client, &RegisterRequest { name, email, password }).await?;
            print_session(&auth)
        }
        Command::Login { email, password } => {
            let client = ctx.client()?;
            let mut auth = AuthContext::new();
            auth.login(&client, &LoginRequest { email, password }).await?;
            print_session(&auth)
        }
        Command::Logout => {
            let client = ctx.client()?;
            let mut auth = ctx.auth()?;
            auth.logout(&client).await?;
            println!("logged out");
            Ok(())
        }
        Command::Palette => {
            for entry in FURNITURE_PALETTE {
                println!("{:<12} {:<12} {}", entry.kind, entry.label, entry.image_url);
            }
            Ok(())
        }
        Command::Design(design) => run_design(&ctx, design).await,
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_design(cli: &CliContext, design: DesignCommand) -> Result<(), CliError> {
    let client = cli.client()?;
    let mut auth = cli.auth()?;
    let session = auth.session().cloned().ok_or(CliError::MissingSessionToken)?;

    match design.command {
        DesignSubcommand::List => {
            let designs = client.list_designs(&session).await?;
            print_json(&designs)
        }
        DesignSubcommand::Show { design_id } => {
            let design = client.get_design(&session, design_id).await?;
            print_json(&design)
        }
        DesignSubcommand::Delete { design_id } => {
            let body = client.delete_design(&session, design_id).await?;
            println!("{}", body.msg);
            Ok(())
        }
        DesignSubcommand::New { name, width, height, edits } => {
            let mut editor = EditorState::new();
            editor.setup_room(name, width, height);
            apply_edits(&mut editor, &edits)?;
            save(&client, &mut auth, &mut editor).await
        }
        DesignSubcommand::Edit { design_id, rename, resize, edits } => {
            let mut editor = EditorState::new();
            match editor.load(&client, &mut auth, design_id).await {
                LoadOutcome::Loaded => {}
                LoadOutcome::Abandoned { error, .. } => return Err(session_aware(&auth, error)),
                LoadOutcome::Stale => return Err(CliError::Stale),
            }
            if let Some(name) = rename {
                editor.rename(name);
            }
            if let Some(size) = resize {
                editor.resize_room(size.width, size.height);
            }
            apply_edits(&mut editor, &edits)?;
            save(&client, &mut auth, &mut editor).await
        }
    }
}

fn apply_edits(editor: &mut EditorState, edits: &EditArgs) -> Result<(), CliError> {
    for placement in &edits.place {
        let entry = palette::find(&placement.target)
            .ok_or_else(|| CliError::UnknownFurniture(placement.target.clone()))?;
        let id = editor.place_item(entry, placement.at);
        eprintln!("placed {} as {id}", entry.kind);
    }

    for movement in &edits.moves {
        let item = editor
            .item(&movement.target)
            .ok_or_else(|| CliError::UnknownItem(movement.target.clone()))?;
        let transform = ItemTransform { x: movement.at.x, y: movement.at.y, ..ItemTransform::of(item) };
        editor.transform_item(&movement.target, transform);
    }

    for rotation in &edits.rotations {
        let item = editor
            .item(&rotation.item)
            .ok_or_else(|| CliError::UnknownItem(rotation.item.clone()))?;
        let transform = ItemTransform { rotation: rotation.degrees, ..ItemTransform::of(item) };
        editor.transform_item(&rotation.item, transform);
    }

    for id in &edits.removals {
        editor
            .delete_item(id)
            .ok_or_else(|| CliError::UnknownItem(id.clone()))?;
    }
    Ok(())
}

async fn save(client: &HttpClient, auth: &mut AuthContext, editor: &mut EditorState) -> Result<(), CliError> {
    match editor.save(client, auth).await {
        None => Err(CliError::SaveBusy),
        Some(SaveOutcome::Created { design_id, .. }) => {
            println!("created {design_id}");
            Ok(())
        }
        Some(SaveOutcome::Updated { .. }) => {
            if let Some(id) = editor.design_id() {
                println!("saved {id}");
            }
            Ok(())
        }
        Some(SaveOutcome::Failed { error, .. }) => Err(session_aware(auth, error)),
        Some(SaveOutcome::Stale) => Err(CliError::Stale),
    }
}

/// Report an auth failure as a lost session once the context has dropped it.
fn session_aware(auth: &AuthContext, error: ApiError) -> CliError {
    if !auth.is_signed_in() && error.is_auth_failure() {
        return CliError::SessionEnded;
    }
    CliError::Api(error)
}

fn print_session(auth: &AuthContext) -> Result<(), CliError> {
    let session = auth.session().ok_or(CliError::MissingSessionToken)?;
    println!("export ROOMCRAFT_TOKEN={}", session.token());
    if let Some(user) = &session.user {
        print_json(user)?;
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_parses_kind_and_coordinates() {
        let parsed: Placement = "sofa@100,120.5".parse().unwrap();
        assert_eq!(parsed.target, "sofa");
        assert_eq!(parsed.at, Point::new(100.0, 120.5));
    }

    #[test]
    fn placement_rejects_missing_parts() {
        assert!("sofa".parse::<Placement>().is_err());
        assert!("sofa@100".parse::<Placement>().is_err());
        assert!("@1,2".parse::<Placement>().is_err());
        assert!("sofa@a,b".parse::<Placement>().is_err());
    }

    #[test]
    fn rotation_and_size_parse() {
        let rotation: Rotation = "abc=90".parse().unwrap();
        assert_eq!(rotation.item, "abc");
        assert!((rotation.degrees - 90.0).abs() < f64::EPSILON);

        let size: Size = "1024X768".parse().unwrap();
        assert_eq!(size, Size { width: 1024.0, height: 768.0 });
        assert!("1024".parse::<Size>().is_err());
    }

    #[test]
    fn edits_apply_in_order() {
        let mut editor = EditorState::new();
        editor.setup_room("Den", 400.0, 300.0);
        let edits = EditArgs {
            place: vec!["sofa@10,20".parse().unwrap(), "tv@50,60".parse().unwrap()],
            ..EditArgs::default()
        };
        apply_edits(&mut editor, &edits).unwrap();
        assert_eq!(editor.items().len(), 2);

        let sofa_id = editor.items()[0].id.clone();
        let edits = EditArgs {
            moves: vec![format!("{sofa_id}@5,5").parse().unwrap()],
            rotations: vec![format!("{sofa_id}=45").parse().unwrap()],
            ..EditArgs::default()
        };
        apply_edits(&mut editor, &edits).unwrap();
        let sofa = editor.item(&sofa_id).unwrap();
        assert!((sofa.x - 5.0).abs() < f64::EPSILON);
        assert!((sofa.rotation - 45.0).abs() < f64::EPSILON);
        assert!((sofa.scale_x - planner::doc::PLACEMENT_SCALE).abs() < f64::EPSILON);

        let edits = EditArgs { removals: vec![sofa_id.clone()], ..EditArgs::default() };
        apply_edits(&mut editor, &edits).unwrap();
        assert_eq!(editor.items().len(), 1);
        assert!(editor.item(&sofa_id).is_none());
    }

    #[test]
    fn unknown_furniture_and_items_are_errors() {
        let mut editor = EditorState::new();
        let edits = EditArgs { place: vec!["piano@1,1".parse().unwrap()], ..EditArgs::default() };
        assert!(matches!(apply_edits(&mut editor, &edits), Err(CliError::UnknownFurniture(_))));

        let edits = EditArgs { removals: vec!["nope".into()], ..EditArgs::default() };
        assert!(matches!(apply_edits(&mut editor, &edits), Err(CliError::UnknownItem(_))));
    }

    #[test]
    fn cli_parses_edit_command() {
        let cli = Cli::try_parse_from([
            "roomcraft-cli",
            "--token",
            "t",
            "design",
            "edit",
            "00000000-0000-0000-0000-000000000000",
            "--resize",
            "640x480",
            "--place",
            "bed@1,2",
            "--place",
            "desk@3,4",
        ])
        .unwrap();
        let Command::Design(DesignCommand { command: DesignSubcommand::Edit { resize, edits, .. } }) = cli.command
        else {
            panic!("expected design edit");
        };
        assert_eq!(resize, Some(Size { width: 640.0, height: 480.0 }));
        assert_eq!(edits.place.len(), 2);
    }
}

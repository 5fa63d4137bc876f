//! Line console front end.
//!
//! Stands in for a drawing surface: strokes are typed as point lists. The
//! selected board is the registry's active board and is passed explicitly
//! to every engine call, together with the version the user last saw. That
//! version only moves on `new`, `select`, `show` and accepted edits, so an
//! edit typed against an outdated view is rejected by the owner.

use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use whiteboard_collab::server::ConnectionCounters;
use whiteboard_collab::{BoardSnapshot, CollabError, Outcome, ReplicationEngine};
use whiteboard_core::{BoardId, Color, Path, Point, Role};

const HELP: &str = "\
commands:
  boards                          list boards
  new [name]                      create a board and select it
  select <n|id>                   select a board by list number or id
  draw <#rrggbb> <width> <x,y>... add a stroke to the selected board
  undo                            remove the last stroke
  clear                           remove every stroke
  share | unshare                 announce or withdraw the selected board
  delete                          delete the selected board
  show                            print the selected board
  stats                           fan-out and connection counters
  quit                            delete all boards and exit";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("{0}")]
    Usage(String),

    #[error("no board selected")]
    NoSelection,

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Boards,
    New(Option<String>),
    Select(Selector),
    Draw(Path),
    Undo,
    Clear,
    Share,
    Unshare,
    Delete,
    Show,
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// 1-based position in the `boards` listing.
    Index(usize),
    Id(BoardId),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb, args.as_slice()) {
        ("boards" | "ls", []) => Command::Boards,
        ("new", []) => Command::New(None),
        ("new", [name]) => Command::New(Some(name.to_string())),
        ("select", [target]) => Command::Select(parse_selector(target)?),
        ("draw", [color, width, points @ ..]) if !points.is_empty() => {
            Command::Draw(parse_stroke(color, width, points)?)
        }
        ("undo", []) => Command::Undo,
        ("clear", []) => Command::Clear,
        ("share", []) => Command::Share,
        ("unshare", []) => Command::Unshare,
        ("delete", []) => Command::Delete,
        ("show", []) => Command::Show,
        ("stats", []) => Command::Stats,
        ("help" | "?", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(ConsoleError::Usage(format!("unrecognized command {line:?}; try help"))),
    };
    Ok(Some(command))
}

fn parse_selector(target: &str) -> Result<Selector, ConsoleError> {
    if let Ok(index) = target.parse::<usize>() {
        return Ok(Selector::Index(index));
    }
    target
        .parse::<BoardId>()
        .map(Selector::Id)
        .map_err(|e| ConsoleError::Usage(e.to_string()))
}

fn parse_stroke(color: &str, width: &str, points: &[&str]) -> Result<Path, ConsoleError> {
    let color = color
        .parse::<Color>()
        .map_err(|e| ConsoleError::Usage(e.to_string()))?;
    let width = width
        .parse::<u32>()
        .map_err(|_| ConsoleError::Usage(format!("invalid stroke width {width:?}")))?;
    let points = points
        .iter()
        .map(|p| {
            p.split_once(',')
                .and_then(|(x, y)| Some(Point::new(x.parse().ok()?, y.parse().ok()?)))
                .ok_or_else(|| ConsoleError::Usage(format!("point must be x,y, got {p:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Path::new(color, width, points))
}

pub struct Console {
    engine: ReplicationEngine,
    counters: Arc<ConnectionCounters>,
    /// Board and version last shown to the user.
    seen: Mutex<Option<(BoardId, u64)>>,
}

impl Console {
    pub fn new(engine: ReplicationEngine, counters: Arc<ConnectionCounters>) -> Self {
        Self {
            engine,
            counters,
            seen: Mutex::new(None),
        }
    }

    async fn remember(&self, id: &BoardId, version: u64) {
        *self.seen.lock().await = Some((id.clone(), version));
    }

    /// Show `id` and record the version displayed.
    async fn view(&self, id: &BoardId) -> Result<BoardSnapshot, ConsoleError> {
        let snapshot = self.engine.snapshot(id).await?;
        self.remember(id, snapshot.version).await;
        Ok(snapshot)
    }

    async fn selected(&self) -> Result<BoardId, ConsoleError> {
        self.engine
            .registry()
            .active()
            .await
            .ok_or(ConsoleError::NoSelection)
    }

    /// Selected board and the version the user is editing against.
    async fn editing(&self) -> Result<(BoardId, u64), ConsoleError> {
        let id = self.selected().await?;
        let seen = self.seen.lock().await.clone();
        match seen {
            Some((seen_id, version)) if seen_id == id => Ok((id, version)),
            _ => {
                let version = self.view(&id).await?.version;
                Ok((id, version))
            }
        }
    }

    async fn edited(&self, id: &BoardId, outcome: Outcome) -> String {
        if let Outcome::Accepted { version } = outcome {
            self.remember(id, version).await;
        }
        describe(outcome)
    }

    /// Run one command and return the text to show.
    pub async fn execute(&self, command: Command) -> Result<String, ConsoleError> {
        match command {
            Command::Boards => {
                let active = self.engine.registry().active().await;
                let mut out = String::new();
                for (i, id) in self.engine.boards().await.iter().enumerate() {
                    let marker = if active.as_ref() == Some(id) { '*' } else { ' ' };
                    let _ = writeln!(out, "{marker}{:>3}  {id}", i + 1);
                }
                if out.is_empty() {
                    out.push_str("no boards");
                }
                Ok(out.trim_end().to_string())
            }
            Command::New(name) => {
                let id = match name {
                    Some(name) => self.engine.create_board(name, true).await?,
                    None => self.engine.create_timestamped_board(true).await?,
                };
                self.remember(&id, 0).await;
                Ok(format!("created {id}"))
            }
            Command::Select(selector) => {
                let id = match selector {
                    Selector::Id(id) => id,
                    Selector::Index(n) => self
                        .engine
                        .boards()
                        .await
                        .into_iter()
                        .nth(n.wrapping_sub(1))
                        .ok_or_else(|| ConsoleError::Usage(format!("no board number {n}")))?,
                };
                self.engine.registry().set_active(&id).await?;
                let version = self.view(&id).await?.version;
                Ok(format!("selected {id} at version {version}"))
            }
            Command::Draw(path) => {
                let (id, base) = self.editing().await?;
                let outcome = self.engine.add_path(&id, base, path).await?;
                Ok(self.edited(&id, outcome).await)
            }
            Command::Undo => {
                let (id, base) = self.editing().await?;
                let outcome = self.engine.undo(&id, base).await?;
                Ok(self.edited(&id, outcome).await)
            }
            Command::Clear => {
                let (id, base) = self.editing().await?;
                let outcome = self.engine.clear(&id, base).await?;
                Ok(self.edited(&id, outcome).await)
            }
            share @ (Command::Share | Command::Unshare) => {
                let shared = share == Command::Share;
                let id = self.selected().await?;
                let changed = self.engine.set_shared(&id, shared).await?;
                let state = if shared { "shared" } else { "not shared" };
                Ok(if changed {
                    format!("{id} is now {state}")
                } else {
                    format!("{id} was already {state}")
                })
            }
            Command::Delete => {
                let id = self.selected().await?;
                let deleted = self.engine.delete_board(&id).await?;
                Ok(format!("deleted {id} ({} subscriber(s) notified)", deleted.notified))
            }
            Command::Show => {
                let id = self.selected().await?;
                Ok(render(&self.view(&id).await?))
            }
            Command::Stats => {
                let fanout = self.engine.stats();
                let server = self.counters.snapshot();
                Ok(format!(
                    "fan-out: {} sent, {} dropped, {} subscriber(s)\n\
                     server: {} active / {} total connections, {} frames in, {} frames out",
                    fanout.messages_sent,
                    fanout.messages_dropped,
                    fanout.active_subscribers,
                    server.active_connections,
                    server.total_connections,
                    server.frames_in,
                    server.frames_out,
                ))
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => {
                self.engine.shutdown().await;
                Ok("bye".to_string())
            }
        }
    }
}

fn describe(outcome: Outcome) -> String {
    match outcome {
        Outcome::Accepted { version } => format!("ok, version {version}"),
        Outcome::Rejected { current } => {
            format!("rejected: board moved on to version {current}; show and retry")
        }
        Outcome::Forwarded => "sent to owner".to_string(),
    }
}

fn render(snapshot: &BoardSnapshot) -> String {
    let role = match snapshot.role {
        Role::Owner if snapshot.shared => format!("owner, shared with {}", snapshot.subscribers),
        Role::Owner => "owner".to_string(),
        Role::Mirror if snapshot.resyncing => "mirror, resyncing".to_string(),
        Role::Mirror => "mirror".to_string(),
    };
    let mut out = format!("{} v{} ({role})", snapshot.id, snapshot.version);
    for (i, path) in snapshot.paths.iter().enumerate() {
        let _ = write!(out, "\n  {:>3}. {}", i + 1, path.encode());
    }
    out
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(
    engine: ReplicationEngine,
    counters: Arc<ConnectionCounters>,
) -> Result<(), ConsoleError> {
    let console = Console::new(engine, counters);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let quit = command == Command::Quit;
        match console.execute(command).await {
            Ok(text) => println!("{text}"),
            Err(e) => println!("error: {e}"),
        }
        if quit {
            return Ok(());
        }
    }

    console.execute(Command::Quit).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use whiteboard_collab::MemoryNetwork;
    use whiteboard_core::PeerAddr;

    fn console() -> Console {
        let net = MemoryNetwork::new();
        let engine = net.spawn_peer(PeerAddr::new("127.0.0.1", 8111));
        Console::new(engine, Arc::new(ConnectionCounters::default()))
    }

    async fn run_line(console: &Console, line: &str) -> Result<String, ConsoleError> {
        let command = parse(line)?.expect("non-empty line");
        console.execute(command).await
    }

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_draw() {
        let command = parse("draw #ff0000 3 10,20 -5,7").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Draw(Path::new(
                Color::RED,
                3,
                vec![Point::new(10, 20), Point::new(-5, 7)]
            ))
        );
    }

    #[test]
    fn test_parse_draw_needs_points() {
        assert!(parse("draw #ff0000 3").is_err());
        assert!(parse("draw #ff0000 3 10").is_err());
        assert!(parse("draw red 3 1,1").is_err());
    }

    #[test]
    fn test_parse_select() {
        assert_eq!(
            parse("select 2").unwrap(),
            Some(Command::Select(Selector::Index(2)))
        );
        let id = BoardId::new(PeerAddr::new("h", 1), "b");
        assert_eq!(
            parse("select h:1:b").unwrap(),
            Some(Command::Select(Selector::Id(id)))
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert!(matches!(parse("paint"), Err(ConsoleError::Usage(_))));
        assert!(matches!(parse("undo now"), Err(ConsoleError::Usage(_))));
    }

    #[tokio::test]
    async fn test_edit_without_selection() {
        let console = console();
        let err = run_line(&console, "undo").await.unwrap_err();
        assert!(matches!(err, ConsoleError::NoSelection));
    }

    #[tokio::test]
    async fn test_new_draw_show() {
        let console = console();
        assert_eq!(
            run_line(&console, "new sketch").await.unwrap(),
            "created 127.0.0.1:8111:sketch"
        );
        assert_eq!(
            run_line(&console, "draw #000000 2 0,0 4,4").await.unwrap(),
            "ok, version 1"
        );
        let shown = run_line(&console, "show").await.unwrap();
        assert!(shown.starts_with("127.0.0.1:8111:sketch v1 (owner)"));
        assert!(shown.contains("#000000,2,0 0;4 4"));

        assert_eq!(run_line(&console, "undo").await.unwrap(), "ok, version 2");
        assert_eq!(run_line(&console, "clear").await.unwrap(), "ok, version 3");
    }

    #[tokio::test]
    async fn test_select_by_number() {
        let console = console();
        run_line(&console, "new a").await.unwrap();
        run_line(&console, "new b").await.unwrap();
        assert_eq!(
            run_line(&console, "select 1").await.unwrap(),
            "selected 127.0.0.1:8111:a at version 0"
        );
        let listing = run_line(&console, "boards").await.unwrap();
        assert!(listing.starts_with("*  1  127.0.0.1:8111:a"));
        assert!(run_line(&console, "select 3").await.is_err());
        assert!(run_line(&console, "select 0").await.is_err());
    }

    #[tokio::test]
    async fn test_share_twice() {
        let console = console();
        run_line(&console, "new a").await.unwrap();
        assert!(run_line(&console, "share").await.unwrap().ends_with("is now shared"));
        assert!(run_line(&console, "share").await.unwrap().ends_with("was already shared"));
    }

    #[tokio::test]
    async fn test_delete_clears_selection() {
        let console = console();
        run_line(&console, "new a").await.unwrap();
        run_line(&console, "delete").await.unwrap();
        assert_eq!(run_line(&console, "boards").await.unwrap(), "no boards");
        assert!(matches!(
            run_line(&console, "show").await.unwrap_err(),
            ConsoleError::NoSelection
        ));
    }

    #[tokio::test]
    async fn test_edit_against_outdated_view_is_rejected() {
        let console = console();
        run_line(&console, "new s").await.unwrap();
        assert!(run_line(&console, "show").await.unwrap().contains(" v0 "));

        // Another writer moves the board on after the user looked at it.
        let id = console.engine.registry().active().await.unwrap();
        let other = Path::new(Color::BLACK, 1, vec![Point::new(1, 1)]);
        console.engine.add_path(&id, 0, other).await.unwrap();

        let reply = run_line(&console, "undo").await.unwrap();
        assert!(reply.starts_with("rejected: board moved on to version 1"));
        assert_eq!(console.engine.snapshot(&id).await.unwrap().version, 1);

        run_line(&console, "show").await.unwrap();
        assert_eq!(run_line(&console, "undo").await.unwrap(), "ok, version 2");
    }
}

//! Line-oriented admin console
//!
//! Drives the gate the way a host front end would: `run` submits an
//! invocation for an actor, the remaining commands map onto the admin
//! operations of [`CooldownGate`].

use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use hourglass_common::{format_duration, now_millis, parse_duration};
use hourglass_engine::{ActorId, AllowReason, CooldownGate, GateDecision, GateRequest};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::config::Configuration;
use crate::startup::ShutdownSignal;

const HELP: &str = "\
commands:
  run <actor> [world=<name>] /<command> [args...]   submit an invocation
  set <key...> <duration>                          create or replace a rule
  remove <key...>                                  delete a rule
  get <key...>                                     base duration for a key
  list [page]                                      list rules, 10 per page
  info <actor> <key...>                            rule and remaining time
  remaining <actor> <key...>                       seconds left for an actor
  active <actor>                                   live cooldowns of an actor
  bypass <actor> [key...]                          toggle a bypass
  clear <actor> [key...]                           clear cooldowns
  evict <actor>                                    drop lapsed entries of an actor
  reload                                           re-read the configuration
  save                                             persist cooldowns now
  stats                                            gate counters
  help                                             this text
  quit                                             save and exit";

/// Result of one console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Output(String),
    Quit,
}

/// Why the console loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    Shutdown,
    InputClosed,
}

pub struct Console {
    gate: Arc<CooldownGate>,
    configuration: Configuration,
}

impl Console {
    pub fn new(gate: Arc<CooldownGate>, configuration: Configuration) -> Self {
        Self {
            gate,
            configuration,
        }
    }

    /// Execute one line; failures are rendered as `error: ...`
    pub async fn execute(&mut self, line: &str, now_ms: i64) -> ConsoleReply {
        match self.dispatch(line, now_ms).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Console command '{}' failed: {:#}", line.trim(), e);
                ConsoleReply::Output(format!("error: {:#}", e))
            }
        }
    }

    async fn dispatch(&mut self, line: &str, now_ms: i64) -> anyhow::Result<ConsoleReply> {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(ConsoleReply::Output(String::new()));
        };
        let args: Vec<&str> = tokens.collect();
        debug!("Console command: {}", line.trim());

        let output = match command.to_lowercase().as_str() {
            "run" => self.run_invocation(&args, now_ms)?,
            "set" => {
                let (duration, key) = args
                    .split_last()
                    .filter(|(_, key)| !key.is_empty())
                    .ok_or_else(|| anyhow!("usage: set <key...> <duration>"))?;
                let seconds = parse_duration(duration)?;
                let key = key.join(" ");
                let stored = self.gate.set_rule(&key, seconds)?;
                format!("{} = {}", key, format_duration(stored))
            }
            "remove" => {
                let key = join_key(&args, "remove <key...>")?;
                if self.gate.remove_rule(&key) {
                    format!("removed {}", key)
                } else {
                    format!("no rule for {}", key)
                }
            }
            "get" => {
                let key = join_key(&args, "get <key...>")?;
                format!("{} = {}", key, format_duration(self.gate.get_rule(&key)))
            }
            "list" => {
                let page = match args.first() {
                    Some(page) => page.parse().context("page must be a number")?,
                    None => 1,
                };
                let listing = self.gate.list_rules_page(page);
                let mut out = format!("rules (page {}/{})", listing.page, listing.max_pages);
                for (key, seconds) in listing.entries {
                    out.push_str(&format!("\n  {} = {}", key, format_duration(seconds)));
                }
                out
            }
            "info" => {
                let (actor, key) = actor_and_key(&args, "info <actor> <key...>")?;
                let key = key.ok_or_else(|| anyhow!("usage: info <actor> <key...>"))?;
                let info = self.gate.info(&actor, &key, now_ms);
                format!(
                    "{}: configured {}, resolved {}, remaining {}",
                    info.action,
                    format_duration(info.configured_seconds),
                    format_duration(self.gate.resolve_duration(&actor, &key)),
                    format_duration(info.remaining_seconds)
                )
            }
            "remaining" => {
                let (actor, key) = actor_and_key(&args, "remaining <actor> <key...>")?;
                let key = key.ok_or_else(|| anyhow!("usage: remaining <actor> <key...>"))?;
                self.gate.remaining(&actor, &key, now_ms).to_string()
            }
            "active" => {
                let (actor, _) = actor_and_key(&args, "active <actor>")?;
                let active = self.gate.active_cooldowns(&actor, now_ms);
                if active.is_empty() {
                    "no active cooldowns".to_string()
                } else {
                    active
                        .into_iter()
                        .map(|(action, expiry)| {
                            let left = (expiry - now_ms).max(0) as u64;
                            format!("{} {}", action, format_duration(left.div_ceil(1_000)))
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            "bypass" => {
                let (actor, key) = actor_and_key(&args, "bypass <actor> [key...]")?;
                let enabled = self.gate.toggle_bypass(&actor, key.as_deref())?;
                format!(
                    "bypass {} for {}: {}",
                    key.as_deref().unwrap_or("(all)"),
                    actor,
                    if enabled { "on" } else { "off" }
                )
            }
            "clear" => {
                let (actor, key) = actor_and_key(&args, "clear <actor> [key...]")?;
                if self.gate.clear(&actor, key.as_deref()) {
                    "cleared".to_string()
                } else {
                    "nothing to clear".to_string()
                }
            }
            "evict" => {
                let (actor, _) = actor_and_key(&args, "evict <actor>")?;
                format!("evicted {}", self.gate.evict_expired(&actor, now_ms))
            }
            "reload" => self.reload(now_ms).await?,
            "save" => {
                if self.gate.save(now_ms).await? {
                    "cooldowns saved".to_string()
                } else {
                    "persistence is disabled".to_string()
                }
            }
            "stats" => {
                let stats = self.gate.stats();
                format!(
                    "total {} allowed {} denied {} bypassed {} excluded {} committed {} actors {}",
                    stats.total,
                    stats.allowed,
                    stats.denied,
                    stats.bypassed,
                    stats.excluded,
                    stats.committed,
                    stats.tracked_actors
                )
            }
            "help" => HELP.to_string(),
            "quit" | "exit" => return Ok(ConsoleReply::Quit),
            other => bail!("unknown command '{}', try help", other),
        };
        Ok(ConsoleReply::Output(output))
    }

    fn run_invocation(&self, args: &[&str], now_ms: i64) -> anyhow::Result<String> {
        let usage = "run <actor> [world=<name>] /<command> [args...]";
        let (actor, rest) = args.split_first().ok_or_else(|| anyhow!("usage: {}", usage))?;
        let actor = parse_actor(actor)?;

        let (world, rest) = match rest.split_first() {
            Some((first, tail)) if first.starts_with("world=") => {
                (Some(first.trim_start_matches("world=")), tail)
            }
            _ => (None, rest),
        };
        if rest.is_empty() {
            bail!("usage: {}", usage);
        }

        let mut request = GateRequest::new(actor, rest.join(" "));
        if let Some(world) = world {
            request = request.with_world(world);
        }
        Ok(render_decision(&self.gate.evaluate(&request, now_ms)))
    }

    async fn reload(&mut self, now_ms: i64) -> anyhow::Result<String> {
        let configuration = self.configuration.reload()?;
        let cooldown = configuration.cooldown_config()?;
        let report = self.gate.reload(&cooldown, now_ms).await?;
        self.configuration = configuration;

        let mut out = format!(
            "reloaded {} rules, {} groups",
            report.rules_loaded, report.groups_loaded
        );
        for skipped in &report.skipped {
            out.push_str(&format!("\n  skipped {}", skipped));
        }
        Ok(out)
    }

    /// Read commands until `quit`, end of input, or shutdown
    pub async fn run<R, W>(
        mut self,
        input: R,
        mut output: W,
        shutdown: ShutdownSignal,
    ) -> anyhow::Result<ConsoleExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut shutdown_rx = shutdown.subscribe();
        info!("Console ready, type help for commands");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Console input closed");
                        return Ok(ConsoleExit::InputClosed);
                    };
                    match self.execute(&line, now_millis()).await {
                        ConsoleReply::Quit => {
                            shutdown.shutdown();
                            return Ok(ConsoleExit::Quit);
                        }
                        ConsoleReply::Output(text) if text.is_empty() => {}
                        ConsoleReply::Output(text) => {
                            output.write_all(text.as_bytes()).await?;
                            output.write_all(b"\n").await?;
                            output.flush().await?;
                        }
                    }
                }
                _ = shutdown_rx.recv() => return Ok(ConsoleExit::Shutdown),
            }
        }
    }
}

/// Text shown to the actor for a gate decision
pub fn render_decision(decision: &GateDecision) -> String {
    match decision {
        GateDecision::Deny { action, remaining } => format!(
            "You must wait {} before using /{} again.",
            format_duration(*remaining),
            action
        ),
        GateDecision::Allow { reason } => match reason {
            AllowReason::Committed { seconds } => {
                format!("allowed, cooldown {}", format_duration(*seconds))
            }
            AllowReason::Bypassed => "allowed (bypass)".to_string(),
            AllowReason::Excluded => "allowed (not gated)".to_string(),
            AllowReason::Disabled => "allowed (gate disabled)".to_string(),
            AllowReason::NoCooldown => "allowed (no cooldown)".to_string(),
        },
    }
}

fn parse_actor(raw: &str) -> anyhow::Result<ActorId> {
    Uuid::parse_str(raw).with_context(|| format!("invalid actor id '{}'", raw))
}

fn join_key(args: &[&str], usage: &str) -> anyhow::Result<String> {
    if args.is_empty() {
        bail!("usage: {}", usage);
    }
    Ok(args.join(" "))
}

fn actor_and_key(args: &[&str], usage: &str) -> anyhow::Result<(ActorId, Option<String>)> {
    let (actor, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("usage: {}", usage))?;
    let key = (!rest.is_empty()).then(|| rest.join(" "));
    Ok((parse_actor(actor)?, key))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use hourglass_engine::{EngineSettings, RuleSet};
    use tokio::io::BufReader;

    use super::*;
    use crate::model::config::Cli;

    const T0: i64 = 1_700_000_000_000;

    fn configuration(path: &PathBuf) -> Configuration {
        let cli = Cli::try_parse_from(["hourglass", "--config", path.to_str().unwrap()]).unwrap();
        Configuration::from_args(cli).unwrap()
    }

    fn console(dir: &tempfile::TempDir) -> Console {
        let gate = Arc::new(CooldownGate::new(
            EngineSettings::default(),
            RuleSet::new(0).with_rule("home", 10),
        ));
        Console::new(gate, configuration(&dir.path().join("application.yml")))
    }

    fn output(reply: ConsoleReply) -> String {
        match reply {
            ConsoleReply::Output(text) => text,
            ConsoleReply::Quit => panic!("unexpected quit"),
        }
    }

    #[tokio::test]
    async fn test_run_commits_then_denies() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(&dir);
        let actor = Uuid::new_v4();

        let first = output(console.execute(&format!("run {} /home", actor), T0).await);
        assert_eq!(first, "allowed, cooldown 10s");

        let second = output(console.execute(&format!("run {} /home", actor), T0 + 3_000).await);
        assert_eq!(second, "You must wait 7s before using /home again.");

        let left = output(console.execute(&format!("remaining {} home", actor), T0 + 3_000).await);
        assert_eq!(left, "7");
    }

    #[tokio::test]
    async fn test_rule_administration() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(&dir);

        assert_eq!(output(console.execute("set home set 1m30s", T0).await), "home set = 1m30s");
        assert_eq!(output(console.execute("get home set", T0).await), "home set = 1m30s");
        assert!(output(console.execute("list", T0).await).contains("home = 10s"));
        assert_eq!(output(console.execute("remove home set", T0).await), "removed home set");
        assert!(output(console.execute("set home soon", T0).await).starts_with("error:"));
    }

    #[tokio::test]
    async fn test_bypass_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(&dir);
        let actor = Uuid::new_v4();

        console.execute(&format!("run {} /home", actor), T0).await;
        assert_eq!(output(console.execute(&format!("clear {} home", actor), T0).await), "cleared");

        let toggled = output(console.execute(&format!("bypass {}", actor), T0).await);
        assert!(toggled.ends_with("on"));
        let run = output(console.execute(&format!("run {} /home", actor), T0).await);
        assert_eq!(run, "allowed (bypass)");
    }

    #[tokio::test]
    async fn test_bad_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(&dir);

        assert!(output(console.execute("run nobody /home", T0).await).starts_with("error:"));
        assert!(output(console.execute("frobnicate", T0).await).contains("unknown command"));
        assert_eq!(console.execute("   ", T0).await, ConsoleReply::Output(String::new()));
        assert_eq!(console.execute("quit", T0).await, ConsoleReply::Quit);
    }

    #[tokio::test]
    async fn test_reload_reads_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("application.yml");
        std::fs::write(&path, "cooldown:\n  cooldowns:\n    home: 10\n").unwrap();
        let (gate, _) =
            CooldownGate::from_config(&configuration(&path).cooldown_config().unwrap()).unwrap();
        let mut console = Console::new(Arc::new(gate), configuration(&path));

        std::fs::write(&path, "cooldown:\n  cooldowns:\n    home: 30\n    warp: 5\n").unwrap();
        let reply = output(console.execute("reload", T0).await);
        assert_eq!(reply, "reloaded 2 rules, 0 groups");
        assert_eq!(output(console.execute("get home", T0).await), "home = 30s");
    }

    #[tokio::test]
    async fn test_run_loop_until_quit() {
        let dir = tempfile::tempdir().unwrap();
        let console = console(&dir);
        let shutdown = ShutdownSignal::new();
        let mut shutdown_rx = shutdown.subscribe();

        let input = BufReader::new(&b"get home\nquit\nget home\n"[..]);
        let mut out: Vec<u8> = Vec::new();
        let exit = console.run(input, &mut out, shutdown).await.unwrap();

        assert_eq!(exit, ConsoleExit::Quit);
        assert_eq!(String::from_utf8(out).unwrap(), "home = 10s\n");
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_run_loop_input_closed() {
        let dir = tempfile::tempdir().unwrap();
        let console = console(&dir);
        let input = BufReader::new(&b"stats\n"[..]);
        let mut out: Vec<u8> = Vec::new();

        let exit = console
            .run(input, &mut out, ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(exit, ConsoleExit::InputClosed);
        assert!(String::from_utf8(out).unwrap().starts_with("total 0"));
    }
}

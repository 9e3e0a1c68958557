//! In-game command dispatcher.
//!
//! Commands arrive as `say` lines in a server's log stream:
//!
//! ```text
//! RL 10/19/2026 - 21:04:11: "alice<12><[U:1:1234]><Red>" say "!timeleft"
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use booker_steamid::SteamId;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{strip_prefix, tokenize, CommandEntry, CommandTrie, ANYONE};
use crate::driver::ControlPlane;
use crate::env::Env;
use crate::messages;
use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCommand {
    Report,
    TimeLeft,
}

/// A player chat line extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSay {
    pub name: String,
    pub user_id: u32,
    pub steam_id: SteamId,
    pub team: String,
    pub text: String,
}

/// Parse a `say` or `say_team` log line. Other lines yield `None`.
pub fn parse_log_line(line: &str) -> Option<LogSay> {
    let line = line.trim_end_matches(['\0', '\n', '\r']);
    let start = line.find('"')?;
    let body = &line[start + 1..];

    let (player, text) = body
        .split_once("\" say \"")
        .or_else(|| body.split_once("\" say_team \""))?;
    let text = text.strip_suffix('"').unwrap_or(text);

    let (rest, team) = take_field(player)?;
    let (rest, steam3) = take_field(rest)?;
    let (name, user_id) = take_field(rest)?;

    Some(LogSay {
        name: name.to_string(),
        user_id: user_id.parse().ok()?,
        steam_id: SteamId::from_steamid3(steam3).ok()?,
        team: team.to_string(),
        text: text.to_string(),
    })
}

/// Split the trailing `<field>` off `s`.
fn take_field(s: &str) -> Option<(&str, &str)> {
    let s = s.strip_suffix('>')?;
    let open = s.rfind('<')?;
    Some((&s[..open], &s[open + 1..]))
}

/// Per-player `!report` rate limit.
struct ReportCooldown {
    window: Duration,
    last: Mutex<HashMap<SteamId, Instant>>,
}

impl ReportCooldown {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Record a report from `player` at `now`; false while still cooling down.
    ///
    /// Expired entries are dropped on every successful report.
    fn try_report(&self, player: SteamId, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last
            .get(&player)
            .is_some_and(|at| now.duration_since(*at) < self.window)
        {
            return false;
        }

        last.retain(|_, at| now.duration_since(*at) < self.window);
        last.insert(player, now);
        true
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct GameDispatcher {
    env: Arc<Env>,
    commands: CommandTrie<GameCommand>,
    cooldown: ReportCooldown,
}

impl GameDispatcher {
    pub fn new(env: Arc<Env>) -> Self {
        let mut commands = CommandTrie::new();
        for (verb, handler) in [("report", GameCommand::Report), ("timeleft", GameCommand::TimeLeft)] {
            commands.insert(
                verb,
                CommandEntry {
                    handler,
                    permissions: ANYONE,
                    dm_allowed: true,
                },
            );
        }

        let cooldown = ReportCooldown::new(env.config().commands.report_duration);
        Self {
            env,
            commands,
            cooldown,
        }
    }

    /// Handle one log line from `server`. Returns the command that ran.
    #[instrument(skip(self, server, line), fields(server = %server.id()))]
    pub async fn handle_line(&self, server: &Arc<Server>, line: &str) -> Option<GameCommand> {
        let say = parse_log_line(line)?;
        let tokens = strip_prefix(tokenize(&say.text), &self.env.config().commands.game_prefix)?;
        let (entry, args) = self.commands.lookup(&tokens)?;

        debug!(command = ?entry.handler, player = %say.name, "Dispatching in-game command");
        match entry.handler {
            GameCommand::Report => self.report(server, &say, args).await,
            GameCommand::TimeLeft => self.time_left(server).await,
        }
        Some(entry.handler)
    }

    async fn report(&self, server: &Server, say: &LogSay, args: &[String]) {
        if !self.cooldown.try_report(say.steam_id, Instant::now()) {
            self.say(server, messages::REPORT_COOLDOWN).await;
            return;
        }

        let reason = if args.is_empty() {
            "(no reason given)".to_string()
        } else {
            args.join(" ")
        };
        info!(player = %say.name, steam = %say.steam_id.steam3(), "Player report");
        self.env
            .coordinator
            .notify_admins(&messages::report(
                server.name(),
                &say.name,
                &say.steam_id.profile_url(),
                &reason,
            ))
            .await;
        self.say(server, messages::REPORT_SENT).await;
    }

    async fn time_left(&self, server: &Server) {
        let state = server.snapshot().await;
        let text = match state.remaining(Utc::now()) {
            Some(left) if state.booked => {
                messages::time_left(&booker_durations::render_secs(left.num_seconds().max(0)))
            }
            _ => messages::TIME_LEFT_UNBOOKED.to_string(),
        };
        self.say(server, &text).await;
    }

    async fn say(&self, server: &Server, command: &str) {
        if let Err(e) = server.driver().send_command(server.identity(), command).await {
            warn!(server = %server.id(), error = %e, "Failed to answer in game");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_say_line() {
        let line = "RL 10/19/2026 - 21:04:11: \"alice<12><[U:1:1234]><Red>\" say \"!report he is cheating\"\n";
        let say = parse_log_line(line).expect("parsed");
        assert_eq!(say.name, "alice");
        assert_eq!(say.user_id, 12);
        assert_eq!(say.steam_id, SteamId::from_account_id(1234));
        assert_eq!(say.team, "Red");
        assert_eq!(say.text, "!report he is cheating");
    }

    #[test]
    fn test_parse_name_with_brackets() {
        let line = r#"L 10/19/2026 - 21:04:11: "<<bob>><3><[U:1:99]><Blue>" say_team "!timeleft""#;
        let say = parse_log_line(line).expect("parsed");
        assert_eq!(say.name, "<<bob>>");
        assert_eq!(say.team, "Blue");
        assert_eq!(say.text, "!timeleft");
    }

    #[rstest]
    #[case(r#"RL 10/19/2026 - 21:04:11: "alice<12><[U:1:1234]><Red>" joined team "Blue""#)]
    #[case(r#"RL 10/19/2026 - 21:04:11: World triggered "Round_Start""#)]
    #[case(r#"RL 10/19/2026 - 21:04:11: "Console<0><Console><Console>" say "hello""#)]
    #[case("")]
    fn test_parse_ignores_other_lines(#[case] line: &str) {
        assert_eq!(parse_log_line(line), None);
    }

    #[test]
    fn test_report_cooldown_per_player() {
        let cooldown = ReportCooldown::new(Duration::from_secs(300));
        let start = Instant::now();
        let alice = SteamId::from_account_id(1);

        assert!(cooldown.try_report(alice, start));
        assert!(!cooldown.try_report(alice, start + Duration::from_secs(299)));
        assert!(cooldown.try_report(SteamId::from_account_id(2), start));
        assert!(cooldown.try_report(alice, start + Duration::from_secs(300)));
    }

    #[test]
    fn test_report_cooldown_prunes_expired_players() {
        let cooldown = ReportCooldown::new(Duration::from_secs(300));
        let start = Instant::now();
        for account in 0..50 {
            assert!(cooldown.try_report(SteamId::from_account_id(account), start));
        }
        assert_eq!(cooldown.tracked(), 50);

        let later = start + Duration::from_secs(301);
        assert!(cooldown.try_report(SteamId::from_account_id(999), later));
        assert_eq!(cooldown.tracked(), 1);
    }
}

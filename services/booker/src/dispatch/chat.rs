//! Chat command dispatcher.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::{permitted, strip_prefix, tokenize, CommandEntry, CommandTrie, ANYONE};
use crate::chat::{CommandInfo, Embed, MessageEvent};
use crate::driver::ControlPlane;
use crate::env::Env;
use crate::messages;
use crate::stats;

/// Console lines returned by `console <session>`.
const CONSOLE_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Book,
    Unbook,
    Extend,
    SendPassword,
    Demos,
    Help,
    Stats,
    Sync,
    Version,
    Update,
    UpdateServer,
    Console,
    Exit,
}

pub struct ChatDispatcher {
    env: Arc<Env>,
    commands: CommandTrie<ChatCommand>,
}

impl ChatDispatcher {
    pub fn new(env: Arc<Env>) -> Self {
        let admin = env.config().commands.admin_permissions;
        let mut commands = CommandTrie::new();

        let user = [
            ("book", ChatCommand::Book),
            ("unbook", ChatCommand::Unbook),
            ("extend", ChatCommand::Extend),
            ("send password", ChatCommand::SendPassword),
            ("demos", ChatCommand::Demos),
            ("help", ChatCommand::Help),
            ("version", ChatCommand::Version),
        ];
        for (verb, handler) in user {
            commands.insert(
                verb,
                CommandEntry {
                    handler,
                    permissions: ANYONE,
                    dm_allowed: true,
                },
            );
        }

        let admin_only = [
            ("stats", ChatCommand::Stats),
            ("sync", ChatCommand::Sync),
            ("update", ChatCommand::Update),
            ("update server", ChatCommand::UpdateServer),
            ("console", ChatCommand::Console),
            ("exit", ChatCommand::Exit),
        ];
        for (verb, handler) in admin_only {
            commands.insert(
                verb,
                CommandEntry {
                    handler,
                    permissions: admin,
                    dm_allowed: false,
                },
            );
        }

        Self { env, commands }
    }

    /// Handle one inbound message. Returns the command that ran, if any.
    #[instrument(skip(self, event), fields(user = %event.user_id, channel = %event.channel_id))]
    pub async fn handle(&self, event: &MessageEvent) -> Option<ChatCommand> {
        let chat = self.env.coordinator.chat();
        if event.user_id == chat.self_user_id() {
            return None;
        }

        let config = self.env.config();
        let channels = &config.discord.acceptable_channels;
        if !event.is_private && !channels.is_empty() && !channels.contains(&event.channel_id) {
            return None;
        }

        let tokens = strip_prefix(tokenize(&event.text), &config.commands.prefix)?;
        let (entry, args) = self.commands.lookup(&tokens)?;
        let info = CommandInfo::from(event);
        let coordinator = &self.env.coordinator;

        if event.is_private && !entry.dm_allowed {
            coordinator.reply(&info, messages::DM_ONLY_IN_CHANNEL).await;
            return None;
        }

        if !permitted(entry.permissions, event.permissions) {
            info!(command = ?entry.handler, "Permission denied");
            coordinator.reply(&info, messages::NO_PERMISSION).await;
            return None;
        }

        debug!(command = ?entry.handler, args = args.len(), "Dispatching");
        self.run(entry.handler, &info, args).await;
        Some(entry.handler)
    }

    async fn run(&self, command: ChatCommand, info: &CommandInfo, args: &[String]) {
        let coordinator = &self.env.coordinator;
        let config = self.env.config();

        // Booking transitions reply on their own, errors included.
        match command {
            ChatCommand::Book => {
                let _ = coordinator.book(info).await;
            }
            ChatCommand::Unbook => {
                let _ = coordinator.unbook(info).await;
            }
            ChatCommand::Extend => {
                let _ = coordinator.extend(info).await;
            }
            ChatCommand::SendPassword => {
                let _ = coordinator.send_password(info).await;
            }
            ChatCommand::Demos => {
                coordinator
                    .reply(info, &messages::demos(&config.discord.demos_url))
                    .await;
            }
            ChatCommand::Help => coordinator.reply(info, &config.help_text()).await,
            ChatCommand::Version => {
                coordinator
                    .reply(info, &messages::version(crate::revision()))
                    .await;
            }
            ChatCommand::Stats => self.stats(info).await,
            ChatCommand::Sync => match coordinator.sync_from_store().await {
                Ok(report) => {
                    coordinator
                        .reply(info, &format!("Synchronised: {report}."))
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "Sync failed");
                    coordinator.reply(info, messages::SOMETHING_WENT_WRONG).await;
                }
            },
            ChatCommand::Update => self.update(info, args).await,
            ChatCommand::UpdateServer => self.update_server(info, args).await,
            ChatCommand::Console => self.console(info, args).await,
            ChatCommand::Exit => {
                coordinator.reply(info, messages::SHUTTING_DOWN).await;
                self.env.request_shutdown();
            }
        }
    }

    async fn stats(&self, info: &CommandInfo) {
        let coordinator = &self.env.coordinator;
        let servers = coordinator.pool().get_servers().await;
        let rows = stats::server_rows(&servers, Utc::now()).await;
        coordinator
            .reply(info, &format!("```\n{}\n```", stats::render_servers(&rows)))
            .await;

        let Some(history) = coordinator.history() else {
            return;
        };
        match history.recent_usage(stats::USAGE_WINDOW_DAYS).await {
            Ok(usage) if usage.is_empty() => {
                coordinator.reply(info, &stats::render_usage(&usage)).await;
            }
            Ok(usage) => {
                let embed = usage.iter().fold(
                    Embed::new(format!("Last {} days", stats::USAGE_WINDOW_DAYS)),
                    |embed, row| {
                        embed.field(
                            &row.server_name,
                            format!("{} bookings, {:.1} hours", row.bookings, row.hours),
                            true,
                        )
                    },
                );
                if let Err(e) = coordinator.chat().reply_embed(&info.channel_id, &embed).await {
                    warn!(error = %e, "Failed to send usage embed");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load booking history");
                coordinator.reply(info, messages::SOMETHING_WENT_WRONG).await;
            }
        }
    }

    async fn update(&self, info: &CommandInfo, args: &[String]) {
        let coordinator = &self.env.coordinator;
        let Some(tag) = args.first() else {
            coordinator.reply(info, "Usage: update <tag>").await;
            return;
        };
        let Some(updater) = &self.env.updater else {
            coordinator.reply(info, "Self-update is not configured.").await;
            return;
        };

        coordinator
            .reply(info, &format!("Updating to {tag}..."))
            .await;
        match updater.update(tag).await {
            Ok(path) => {
                info!(tag = %tag, path = %path.display(), "Update installed, shutting down");
                coordinator
                    .reply(info, &format!("Installed {tag}, restarting."))
                    .await;
                self.env.request_shutdown();
            }
            Err(e) => {
                error!(tag = %tag, error = %e, "Self-update failed");
                coordinator
                    .reply(info, &format!("Update to {tag} failed."))
                    .await;
            }
        }
    }

    async fn update_server(&self, info: &CommandInfo, args: &[String]) {
        let coordinator = &self.env.coordinator;
        if args.is_empty() {
            coordinator.reply(info, "Usage: update server <name>").await;
            return;
        }

        let name = args.join(" ");
        let Some(server) = coordinator.pool().get_server_by_name(&name).await else {
            coordinator
                .reply(info, &format!("Unknown server {name}."))
                .await;
            return;
        };
        if server.driver().as_api().is_none() {
            coordinator
                .reply(info, &format!("{} is not managed by the booking API.", server.name()))
                .await;
            return;
        }

        coordinator
            .reply(info, &format!("Updating {}...", server.name()))
            .await;

        let detached = Arc::clone(coordinator);
        let info = info.clone();
        coordinator.supervisor().spawn("update-server", async move {
            let Some(api) = server.driver().as_api() else {
                return;
            };
            let text = match api.update_game().await {
                Ok(()) => format!("{} is up to date.", server.name()),
                Err(e) => {
                    error!(server = %server.id(), error = %e, "Game update failed");
                    format!("Updating {} failed.", server.name())
                }
            };
            detached.reply(&info, &text).await;
        });
    }

    async fn console(&self, info: &CommandInfo, args: &[String]) {
        let coordinator = &self.env.coordinator;
        let Some(session) = args.first() else {
            coordinator.reply(info, "Usage: console <session>").await;
            return;
        };
        let Some(server) = coordinator.pool().get_server_by_session_name(session).await else {
            coordinator
                .reply(info, &format!("Unknown server {session}."))
                .await;
            return;
        };

        match server
            .driver()
            .console_read(server.identity(), CONSOLE_LINES)
            .await
        {
            Ok(lines) => {
                coordinator
                    .reply(info, &format!("```\n{}\n```", lines.join("\n")))
                    .await;
            }
            Err(e) => {
                warn!(server = %server.id(), error = %e, "Console read failed");
                coordinator.reply(info, messages::SOMETHING_WENT_WRONG).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{RecordingFrontend, Sent};
    use crate::config::Config;
    use crate::coordinator::{Coordinator, CoordinatorParts};
    use crate::db::{BookingHistory, BookingRecord, MemoryHistory};
    use crate::driver::{Driver, MockDriver};
    use crate::pool::{StaticPool, DEFAULT_TICK_RATE_TARGET};
    use crate::query::MockQuery;
    use crate::server::{Server, ServerIdentity};
    use crate::store::{MemoryStore, Reservations};
    use crate::supervisor::TaskSupervisor;
    use tokio::sync::watch;

    const ADMIN: i64 = 0x8;

    struct Harness {
        dispatcher: ChatDispatcher,
        chat: Arc<RecordingFrontend>,
        env: Arc<Env>,
        driver: MockDriver,
        history: Arc<MemoryHistory>,
    }

    fn harness(config: Config) -> Harness {
        let driver = MockDriver::new();
        let server = Arc::new(Server::new(
            ServerIdentity {
                id: "pug1".into(),
                name: "Pug 1".into(),
                address: "10.0.0.1:27015".into(),
                stv_address: "10.0.0.1:27020".into(),
                session_name: "pug1".into(),
            },
            Driver::Mock(driver.clone()),
        ));
        let chat = Arc::new(RecordingFrontend::new("bot"));
        let history = Arc::new(MemoryHistory::new());
        let coordinator = Coordinator::new(CoordinatorParts {
            config: Arc::new(config),
            pool: Arc::new(StaticPool::new(vec![server], DEFAULT_TICK_RATE_TARGET)),
            reservations: Reservations::new(Arc::new(MemoryStore::new())),
            chat: chat.clone(),
            query: Arc::new(MockQuery::new()),
            history: Some(history.clone()),
            supervisor: Arc::new(TaskSupervisor::new()),
        });
        let (shutdown, _) = watch::channel(false);
        let env = Env::new(coordinator, None, shutdown);

        Harness {
            dispatcher: ChatDispatcher::new(Arc::clone(&env)),
            chat,
            env,
            driver,
            history,
        }
    }

    fn message(user: &str, channel: &str, text: &str, permissions: i64) -> MessageEvent {
        MessageEvent {
            user_id: user.into(),
            channel_id: channel.into(),
            text: text.into(),
            is_private: false,
            permissions,
        }
    }

    #[tokio::test]
    async fn test_ignores_own_messages() {
        let h = harness(Config::default());
        let handled = h.dispatcher.handle(&message("bot", "general", "book", 0)).await;
        assert_eq!(handled, None);
        assert!(h.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_other_channels() {
        let mut config = Config::default();
        config.discord.acceptable_channels = vec!["bookings".into()];
        let h = harness(config);

        assert_eq!(h.dispatcher.handle(&message("1", "general", "help", 0)).await, None);
        assert_eq!(
            h.dispatcher.handle(&message("1", "bookings", "help", 0)).await,
            Some(ChatCommand::Help)
        );
    }

    #[tokio::test]
    async fn test_admin_command_requires_permission() {
        let h = harness(Config::default());

        assert_eq!(h.dispatcher.handle(&message("1", "general", "exit", 0)).await, None);
        assert_eq!(h.chat.channel("general"), vec![messages::NO_PERMISSION.to_string()]);
        assert!(!h.env.is_shutting_down());

        assert_eq!(
            h.dispatcher.handle(&message("1", "general", "EXIT", ADMIN)).await,
            Some(ChatCommand::Exit)
        );
        assert!(h.env.is_shutting_down());
    }

    #[tokio::test]
    async fn test_admin_command_rejected_in_dm() {
        let h = harness(Config::default());
        let mut event = message("1", "dm-1", "sync", ADMIN);
        event.is_private = true;

        assert_eq!(h.dispatcher.handle(&event).await, None);
        assert_eq!(h.chat.channel("dm-1"), vec![messages::DM_ONLY_IN_CHANNEL.to_string()]);
    }

    #[tokio::test]
    async fn test_prefix_required() {
        let mut config = Config::default();
        config.commands.prefix = "!".into();
        let h = harness(config);

        assert_eq!(h.dispatcher.handle(&message("1", "general", "demos", 0)).await, None);
        assert_eq!(
            h.dispatcher.handle(&message("1", "general", "!demos", 0)).await,
            Some(ChatCommand::Demos)
        );
    }

    #[tokio::test]
    async fn test_send_password_multiword() {
        let h = harness(Config::default());

        h.dispatcher.handle(&message("1", "general", "book", 0)).await;
        h.env.coordinator.supervisor().drain().await;
        h.chat.clear();

        let handled = h
            .dispatcher
            .handle(&message("1", "general", "  Send Password", 0))
            .await;
        assert_eq!(handled, Some(ChatCommand::SendPassword));
        let dms = h.chat.direct_to("1");
        assert_eq!(dms.len(), 1);
        assert!(dms[0].contains("password pass-pug1"));
    }

    #[tokio::test]
    async fn test_console_reads_lines() {
        let h = harness(Config::default());
        h.driver.set_console(vec!["line one".into(), "line two".into()]);

        let handled = h
            .dispatcher
            .handle(&message("1", "general", "console PUG1", ADMIN))
            .await;
        assert_eq!(handled, Some(ChatCommand::Console));
        let replies = h.chat.channel("general");
        assert!(replies[0].contains("line one\nline two"));
    }

    #[tokio::test]
    async fn test_update_server_requires_api_driver() {
        let h = harness(Config::default());

        let handled = h
            .dispatcher
            .handle(&message("1", "general", "update server pug 1", ADMIN))
            .await;
        assert_eq!(handled, Some(ChatCommand::UpdateServer));
        assert!(h.chat.channel("general")[0].contains("not managed by the booking API"));
    }

    #[tokio::test]
    async fn test_stats_lists_servers() {
        let h = harness(Config::default());

        h.dispatcher
            .handle(&message("1", "general", "stats", ADMIN))
            .await;
        let sent = h.chat.sent();
        assert!(matches!(
            &sent[0],
            Sent::Channel { text, .. } if text.contains("Pug 1") && text.contains("available")
        ));
    }

    #[tokio::test]
    async fn test_stats_sends_usage_embed() {
        let h = harness(Config::default());
        let unbooked_at = Utc::now();
        h.history
            .record_booking(&BookingRecord {
                server_name: "Pug 1".into(),
                booker_id: "1".into(),
                booker_name: "alice".into(),
                booked_at: unbooked_at - chrono::TimeDelta::hours(2),
                unbooked_at,
                demos: Vec::new(),
            })
            .await
            .unwrap();

        h.dispatcher
            .handle(&message("1", "general", "stats", ADMIN))
            .await;
        let embeds = h.chat.embeds();
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds[0].fields[0].name, "Pug 1");
        assert_eq!(embeds[0].fields[0].value, "1 bookings, 2.0 hours");
    }
}

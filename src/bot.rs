// src/bot.rs
//! Chat command loop: long-polls Telegram for messages and maps them to
//! registration, on-demand runs and static replies.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ingest::types::RunReport;
use crate::ingest::Pipeline;
use crate::notify::telegram::{ReplyKeyboard, TelegramGateway, Update};
use crate::subscribers::SubscriberRegistry;

pub const BTN_NEWS: &str = "📢 Новини";
pub const BTN_EVENTS: &str = "📆 Події";
pub const BTN_INFO: &str = "ℹ Інформація";
pub const BTN_HELP: &str = "❓ Допомога";

const GREETING: &str = "Привіт! Я новинний бот. Я буду надсилати тобі останні новини.";
const EVENTS_REPLY: &str = "Список подій...";
const INFO_REPLY: &str = "Це бот для новин.";
const HELP_REPLY: &str = "Список команд: /start, /menu";
const STOP_REPLY: &str = "Підписку скасовано.";
const BUSY_REPLY: &str = "Перевірка новин уже триває, спробуйте пізніше.";

const POLL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Menu,
    News,
    Events,
    Info,
    Help,
}

impl Command {
    /// Map a message text to a command. `/cmd@botname` and trailing args are accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let t = text.trim();
        if let Some(rest) = t.strip_prefix('/') {
            let word = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            return match word.as_str() {
                "start" => Some(Command::Start),
                "stop" => Some(Command::Stop),
                "menu" => Some(Command::Menu),
                "news" => Some(Command::News),
                "help" => Some(Command::Help),
                _ => None,
            };
        }
        match t {
            BTN_NEWS => Some(Command::News),
            BTN_EVENTS => Some(Command::Events),
            BTN_INFO => Some(Command::Info),
            BTN_HELP => Some(Command::Help),
            _ => None,
        }
    }
}

pub fn menu_keyboard() -> ReplyKeyboard {
    ReplyKeyboard {
        keyboard: vec![
            vec![BTN_NEWS.to_string(), BTN_EVENTS.to_string()],
            vec![BTN_INFO.to_string(), BTN_HELP.to_string()],
        ],
        resize_keyboard: true,
        one_time_keyboard: true,
    }
}

pub fn run_summary(report: &RunReport) -> String {
    if report.bootstrapped && report.fresh == 0 {
        return "Стрічку підключено. Нові статті надходитимуть автоматично.".to_string();
    }
    if report.fresh == 0 {
        return "🔍 Нових статей не знайдено".to_string();
    }
    let mut s = format!("📢 Нових статей: {}, надіслано: {}", report.fresh, report.delivered);
    if report.failed > 0 {
        s.push_str(&format!(", не вдалося: {}", report.failed));
    }
    s
}

pub struct CommandBot {
    gateway: TelegramGateway,
    subscribers: SubscriberRegistry,
    pipeline: Arc<Pipeline>,
}

impl CommandBot {
    pub fn new(gateway: TelegramGateway, subscribers: SubscriberRegistry, pipeline: Arc<Pipeline>) -> Self {
        Self {
            gateway,
            subscribers,
            pipeline,
        }
    }

    /// Poll until cancelled. Poll errors back off and retry.
    pub async fn run(self, cancel: CancellationToken) {
        let mut offset: i64 = 0;
        let mut backoff = Duration::from_secs(1);
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.gateway.get_updates(offset, POLL_SECS) => r,
            };
            match polled {
                Ok(updates) => {
                    backoff = Duration::from_secs(1);
                    for u in updates {
                        offset = offset.max(u.update_id + 1);
                        self.handle_update(u, &cancel).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "bot", error = %e, backoff_secs = backoff.as_secs(), "getUpdates failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                }
            }
        }
        tracing::info!(target: "bot", "command loop stopped");
    }

    async fn handle_update(&self, update: Update, cancel: &CancellationToken) {
        let Some(msg) = update.message else {
            return;
        };
        let Some(cmd) = msg.text.as_deref().and_then(Command::parse) else {
            return;
        };
        let chat_id = msg.chat.id;
        tracing::info!(target: "bot", chat_id, ?cmd, "command received");

        let result = match cmd {
            Command::Start => {
                self.subscribers.register(chat_id).await;
                self.gateway.reply(chat_id, GREETING, Some(&menu_keyboard())).await
            }
            Command::Menu => self.gateway.reply(chat_id, HELP_REPLY, Some(&menu_keyboard())).await,
            Command::Stop => {
                self.subscribers.unregister(chat_id).await;
                self.gateway.reply(chat_id, STOP_REPLY, None).await
            }
            Command::News => {
                let text = match self.pipeline.try_run(cancel).await {
                    Some(report) => run_summary(&report),
                    None => BUSY_REPLY.to_string(),
                };
                self.gateway.reply(chat_id, &text, None).await
            }
            Command::Events => self.gateway.reply(chat_id, EVENTS_REPLY, None).await,
            Command::Info => self.gateway.reply(chat_id, INFO_REPLY, None).await,
            Command::Help => self.gateway.reply(chat_id, HELP_REPLY, None).await,
        };

        if let Err(e) = result {
            tracing::warn!(target: "bot", chat_id, error = %e, "reply failed");
        }
    }
}

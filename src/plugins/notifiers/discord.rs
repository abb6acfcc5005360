use crate::config::DiscordConfig as DiscordDefaults;
use crate::plugins::traits::{
    NotifierPlugin, NotificationEvent, NotificationResult, ConfigSchema, ChangeType,
};
use crate::plugins::traits::notifier::NotifierError;
use crate::plugins::traits::tracker::{ConfigField, ConfigFieldType};
use crate::models::ThresholdType;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

const WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";
const MAX_LISTED_SOURCES: usize = 10;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub webhook_url: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub mention_role: Option<String>,
    pub mention_user: Option<String>,
}

impl DiscordConfig {
    pub fn from_json(config: &serde_json::Value) -> Result<Self, String> {
        let webhook_url = config.get("webhook_url")
            .and_then(|v| v.as_str())
            .ok_or("Missing webhook_url")?;

        if !webhook_url.starts_with(WEBHOOK_PREFIX) {
            return Err("Invalid Discord webhook URL format".to_string());
        }

        let text = |key: &str| {
            config.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        Ok(DiscordConfig {
            webhook_url: webhook_url.to_string(),
            username: text("username"),
            avatar_url: text("avatar_url"),
            mention_role: text("mention_role"),
            mention_user: text("mention_user"),
        })
    }
}

pub struct DiscordNotifier {
    client: Client,
    defaults: DiscordDefaults,
}

impl Default for DiscordNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordNotifier {
    pub fn new() -> Self {
        Self::with_defaults(DiscordDefaults::default())
    }

    pub fn with_defaults(defaults: DiscordDefaults) -> Self {
        DiscordNotifier {
            client: Client::new(),
            defaults,
        }
    }

    fn get_embed_color(&self, change_type: &ChangeType) -> u32 {
        match change_type {
            ChangeType::Decreased => 0x00ff00,
            ChangeType::Increased => 0xff9900,
            ChangeType::Unchanged => 0x0099ff,
        }
    }

    fn get_emoji(&self, change_type: &ChangeType) -> &str {
        match change_type {
            ChangeType::Decreased => "📉",
            ChangeType::Increased => "📈",
            ChangeType::Unchanged => "📊",
        }
    }

    fn create_embed(&self, event: &NotificationEvent) -> serde_json::Value {
        let mut fields = Vec::new();

        let change_title = match event.change_type {
            ChangeType::Decreased => "💰 Value Dropped!",
            ChangeType::Increased => "⚠️ Value Increased",
            ChangeType::Unchanged => "📊 Update",
        };
        fields.push(json!({
            "name": change_title,
            "value": format!("**Old:** {}\n**New:** {}\n**Change:** {}",
                           event.formatted_old, event.formatted_new, event.difference),
            "inline": false
        }));

        if let Some(source) = &event.source {
            fields.push(json!({
                "name": "🏪 Store",
                "value": format!("[{}]({})", source.store_name, source.url),
                "inline": true
            }));
        }

        if let Some(comparison) = &event.comparison {
            fields.push(json!({
                "name": "🎯 Best Deal",
                "value": format!("[{} - {}]({})",
                               comparison.best.store_name,
                               comparison.best.formatted_value,
                               comparison.best.url),
                "inline": true
            }));

            if let Some(savings) = &comparison.savings {
                fields.push(json!({
                    "name": "💸 Savings",
                    "value": format!("{:.2} ({:.1}%)", savings.amount, savings.percentage),
                    "inline": true
                }));
            }

            let listing: Vec<String> = comparison.all_sources
                .iter()
                .take(MAX_LISTED_SOURCES)
                .map(|s| {
                    let marker = if s.source_id == comparison.best.source_id { "⭐ " } else { "" };
                    let changed = if s.changed { " (changed)" } else { "" };
                    format!("{}[{}]({}): {}{}", marker, s.store_name, s.url, s.formatted_value, changed)
                })
                .collect();
            if !listing.is_empty() {
                fields.push(json!({
                    "name": "📋 All Sources",
                    "value": listing.join("\n"),
                    "inline": false
                }));
            }
        }

        if let Some(threshold) = &event.threshold {
            let rule = match threshold.threshold_type {
                ThresholdType::Absolute => format!("{}", threshold.value),
                ThresholdType::Relative => format!("{}%", threshold.value),
            };
            fields.push(json!({
                "name": "🎚️ Threshold",
                "value": rule,
                "inline": true
            }));
        }

        fields.push(json!({
            "name": "Actions",
            "value": format!("[View]({}) • [Purchased]({}) • [False positive]({}) • [Dismiss]({})",
                           event.action_urls.view_product,
                           event.action_urls.purchased,
                           event.action_urls.false_positive,
                           event.action_urls.dismiss),
            "inline": false
        }));

        json!({
            "title": format!("{} {}", self.get_emoji(&event.change_type), event.product.name),
            "url": event.action_urls.view_product,
            "color": self.get_embed_color(&event.change_type),
            "timestamp": event.timestamp.to_rfc3339(),
            "fields": fields,
            "footer": {
                "text": format!("Uatu Watcher • {} tracker", event.product.tracker_type)
            }
        })
    }

    fn create_webhook_payload(&self, event: &NotificationEvent, config: &DiscordConfig) -> serde_json::Value {
        let mut payload = json!({
            "embeds": [self.create_embed(event)],
            "username": config.username.clone().unwrap_or_else(|| self.defaults.username.clone()),
        });

        if let Some(avatar_url) = config.avatar_url.as_ref().or(self.defaults.avatar_url.as_ref()) {
            payload["avatar_url"] = json!(avatar_url);
        }

        let mut content_parts = Vec::new();
        if let Some(role) = &config.mention_role {
            content_parts.push(format!("<@&{}>", role));
        }
        if let Some(user) = &config.mention_user {
            content_parts.push(format!("<@{}>", user));
        }
        if !content_parts.is_empty() {
            payload["content"] = json!(content_parts.join(" "));
        }

        payload
    }

    /// Posts to the webhook and waits for Discord to echo the created message.
    async fn post(&self, webhook_url: &str, payload: &serde_json::Value) -> Result<NotificationResult, NotifierError> {
        let response = self.client
            .post(webhook_url)
            .query(&[("wait", "true")])
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Discord webhook rejected message: {} {}", status, body);
            return Ok(NotificationResult::rejected(format!("Discord returned {}: {}", status, body)));
        }

        let message_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("id").and_then(|id| id.as_str()).map(str::to_string));
        debug!("Discord message delivered: {:?}", message_id);

        Ok(NotificationResult::delivered(message_id))
    }

    async fn deliver(&self, event: &NotificationEvent, config: &DiscordConfig) -> Result<NotificationResult, NotifierError> {
        let payload = self.create_webhook_payload(event, config);
        self.post(&config.webhook_url, &payload).await
    }
}

#[async_trait]
impl NotifierPlugin for DiscordNotifier {
    fn name(&self) -> &str {
        "Discord Notifier"
    }

    fn plugin_type(&self) -> &str {
        "discord"
    }

    fn description(&self) -> &str {
        "Sends rich notifications via Discord webhooks with embeds"
    }

    async fn initialize(&self, config: &serde_json::Value) -> Result<(), NotifierError> {
        DiscordConfig::from_json(config)
            .map_err(|e| format!("Invalid Discord configuration: {}", e))?;
        Ok(())
    }

    async fn notify(&self, event: &NotificationEvent, config: &serde_json::Value) -> Result<NotificationResult, NotifierError> {
        let discord_config = match DiscordConfig::from_json(config) {
            Ok(c) => c,
            Err(e) => return Ok(NotificationResult::rejected(format!("Invalid Discord configuration: {}", e))),
        };
        self.deliver(event, &discord_config).await
    }

    async fn test_connection(&self, config: &serde_json::Value) -> Result<bool, NotifierError> {
        let discord_config = DiscordConfig::from_json(config)
            .map_err(|e| format!("Invalid Discord configuration: {}", e))?;

        let payload = json!({
            "content": "🧪 Uatu Watcher connection test",
            "username": discord_config.username.clone().unwrap_or_else(|| self.defaults.username.clone()),
        });

        let result = self.post(&discord_config.webhook_url, &payload).await?;
        Ok(result.success)
    }

    fn get_config_schema(&self) -> ConfigSchema {
        let text_field = |name: &str, label: &str, required: bool, default: Option<serde_json::Value>| ConfigField {
            name: name.to_string(),
            field_type: ConfigFieldType::Text,
            label: label.to_string(),
            required,
            default,
            options: None,
        };

        ConfigSchema {
            fields: vec![
                text_field("webhook_url", "Discord Webhook URL", true, None),
                text_field("username", "Bot Username", false, Some(json!(self.defaults.username))),
                text_field("avatar_url", "Bot Avatar URL", false, None),
                text_field("mention_role", "Role ID to Mention", false, None),
                text_field("mention_user", "User ID to Mention", false, None),
            ],
        }
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        self.get_config_schema().validate(config) && DiscordConfig::from_json(config).is_ok()
    }
}

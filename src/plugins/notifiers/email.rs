use crate::config::SmtpConfig;
use crate::plugins::traits::{
    NotifierPlugin, NotificationEvent, NotificationResult, ConfigSchema, ChangeType,
};
use crate::plugins::traits::notifier::NotifierError;
use crate::plugins::traits::tracker::{ConfigField, ConfigFieldType};
use crate::models::ThresholdType;
use async_trait::async_trait;
use lettre::message::{header, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::{debug, warn};

/// Fully resolved SMTP settings for one delivery. Per-product settings win over the
/// process-wide defaults.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
    pub to_email: String,
    pub use_tls: bool,
}

impl EmailConfig {
    pub fn from_json(config: &serde_json::Value, defaults: &SmtpConfig) -> Result<Self, String> {
        let text = |key: &str| {
            config.get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        let smtp_server = text("smtp_server")
            .or_else(|| defaults.host.clone())
            .ok_or("Missing smtp_server")?;
        let smtp_port = config.get("smtp_port")
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(defaults.port);
        let from_email = text("from_email")
            .or_else(|| defaults.from_address.clone())
            .ok_or("Missing from_email")?;
        let to_email = text("to_email").ok_or("Missing to_email")?;

        if !to_email.contains('@') {
            return Err(format!("Invalid to_email: {}", to_email));
        }

        Ok(EmailConfig {
            smtp_server,
            smtp_port,
            username: text("username").or_else(|| defaults.username.clone()),
            password: text("password").or_else(|| defaults.password.clone()),
            from_email,
            from_name: text("from_name").unwrap_or_else(|| defaults.from_name.clone()),
            to_email,
            use_tls: config.get("use_tls").and_then(|v| v.as_bool()).unwrap_or(defaults.use_tls),
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifierError> {
        let builder = if self.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.smtp_server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.smtp_server)
        }
        .port(self.smtp_port);

        let builder = match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(builder.build())
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub struct EmailNotifier {
    defaults: SmtpConfig,
}

impl Default for EmailNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailNotifier {
    pub fn new() -> Self {
        Self::with_defaults(SmtpConfig::default())
    }

    pub fn with_defaults(defaults: SmtpConfig) -> Self {
        EmailNotifier { defaults }
    }

    fn format_subject(&self, event: &NotificationEvent) -> String {
        match event.change_type {
            ChangeType::Decreased => format!("🔔 Dropped: {} - {}", event.product.name, event.formatted_new),
            ChangeType::Increased => format!("📈 Increased: {} - {}", event.product.name, event.formatted_new),
            ChangeType::Unchanged => format!("📊 Update: {}", event.product.name),
        }
    }

    fn format_html_body(&self, event: &NotificationEvent) -> String {
        let mut html = String::new();

        html.push_str(&format!(r#"
<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background: #f0f0f0; padding: 15px; border-radius: 5px; }}
        .product {{ font-size: 18px; font-weight: bold; }}
        .change {{ margin: 15px 0; padding: 10px; border-radius: 5px; }}
        .value-drop {{ background: #e8f5e8; border-left: 4px solid #4CAF50; }}
        .value-increase {{ background: #fff3cd; border-left: 4px solid #ff9800; }}
        .comparison {{ margin: 15px 0; }}
        .source {{ margin: 5px 0; padding: 10px; background: #f9f9f9; border-radius: 3px; }}
        .best {{ font-weight: bold; }}
        .actions {{ margin: 20px 0; }}
        .button {{ display: inline-block; padding: 8px 15px; margin: 5px; text-decoration: none; border-radius: 3px; }}
        .primary {{ background: #007cba; color: white; }}
        .secondary {{ background: #6c757d; color: white; }}
    </style>
</head>
<body>
    <div class="header">
        <div class="product">{}</div>
    </div>
"#, escape_html(&event.product.name)));

        let change_class = match event.change_type {
            ChangeType::Increased => "value-increase",
            ChangeType::Decreased | ChangeType::Unchanged => "value-drop",
        };

        html.push_str(&format!(r#"
    <div class="change {}">
        <strong>Change:</strong> {} → {}<br>
        <strong>Difference:</strong> {}
    </div>
"#, change_class, escape_html(&event.formatted_old), escape_html(&event.formatted_new), escape_html(&event.difference)));

        if let Some(threshold) = &event.threshold {
            let rule = match threshold.threshold_type {
                ThresholdType::Absolute => format!("{}", threshold.value),
                ThresholdType::Relative => format!("{}%", threshold.value),
            };
            html.push_str(&format!("    <p>Threshold: {}</p>\n", rule));
        }

        if let Some(source) = &event.source {
            html.push_str(&format!(r#"
    <div class="source">
        <strong>Store:</strong> {}<br>
        <strong>URL:</strong> <a href="{}">{}</a>
    </div>
"#, escape_html(&source.store_name), source.url, escape_html(&source.url)));
        }

        if let Some(comparison) = &event.comparison {
            html.push_str(r#"<div class="comparison"><h3>Comparison</h3>"#);
            html.push_str(&format!(r#"
    <div class="source best">
        <strong>Best Deal:</strong> {} - {}
        <a href="{}" class="button primary">View Deal</a>
    </div>
"#, escape_html(&comparison.best.store_name), escape_html(&comparison.best.formatted_value), comparison.best.url));

            if let Some(savings) = &comparison.savings {
                html.push_str(&format!(
                    "    <p>Savings versus the most expensive source: {:.2} ({:.1}%)</p>\n",
                    savings.amount, savings.percentage
                ));
            }

            html.push_str("    <ul>\n");
            for source in &comparison.all_sources {
                html.push_str(&format!(
                    "        <li><a href=\"{}\">{}</a>: {}{}</li>\n",
                    source.url,
                    escape_html(&source.store_name),
                    escape_html(&source.formatted_value),
                    if source.changed { " (changed)" } else { "" }
                ));
            }
            html.push_str("    </ul>\n</div>");
        }

        if let Some(screenshot) = &event.screenshot {
            html.push_str(&format!(
                "    <p><img src=\"data:image/png;base64,{}\" alt=\"Page screenshot\" style=\"max-width: 100%;\"></p>\n",
                screenshot
            ));
        }

        html.push_str(&format!(r#"
    <div class="actions">
        <a href="{}" class="button primary">View Product</a>
        <a href="{}" class="button secondary">Mark as Purchased</a>
        <a href="{}" class="button secondary">False Positive</a>
        <a href="{}" class="button secondary">Dismiss</a>
    </div>
"#, event.action_urls.view_product, event.action_urls.purchased, event.action_urls.false_positive, event.action_urls.dismiss));

        html.push_str(r#"
</body>
</html>
"#);

        html
    }

    fn format_text_body(&self, event: &NotificationEvent) -> String {
        let mut text = String::new();

        text.push_str("🔔 UATU WATCHER ALERT\n\n");
        text.push_str(&format!("Product: {}\n", event.product.name));
        text.push_str(&format!("Change: {} → {}\n", event.formatted_old, event.formatted_new));
        text.push_str(&format!("Difference: {}\n\n", event.difference));

        if let Some(source) = &event.source {
            text.push_str(&format!("Store: {}\n", source.store_name));
            text.push_str(&format!("URL: {}\n\n", source.url));
        }

        if let Some(comparison) = &event.comparison {
            text.push_str("COMPARISON:\n");
            text.push_str(&format!("Best Deal: {} - {}\n", comparison.best.store_name, comparison.best.formatted_value));
            text.push_str(&format!("Best Deal URL: {}\n", comparison.best.url));
            for source in &comparison.all_sources {
                text.push_str(&format!("  - {}: {}\n", source.store_name, source.formatted_value));
            }
            text.push('\n');
        }

        text.push_str("ACTIONS:\n");
        text.push_str(&format!("View Product: {}\n", event.action_urls.view_product));
        text.push_str(&format!("Mark Purchased: {}\n", event.action_urls.purchased));
        text.push_str(&format!("False Positive: {}\n", event.action_urls.false_positive));
        text.push_str(&format!("Dismiss: {}\n", event.action_urls.dismiss));

        text
    }

    fn build_message(&self, event: &NotificationEvent, config: &EmailConfig) -> Result<Message, NotifierError> {
        let message = Message::builder()
            .from(format!("{} <{}>", config.from_name, config.from_email).parse()?)
            .to(config.to_email.parse()?)
            .subject(self.format_subject(event))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(self.format_text_body(event))
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(self.format_html_body(event))
                    )
            )?;
        Ok(message)
    }
}

#[async_trait]
impl NotifierPlugin for EmailNotifier {
    fn name(&self) -> &str {
        "Email Notifier"
    }

    fn plugin_type(&self) -> &str {
        "email"
    }

    fn description(&self) -> &str {
        "Sends notifications via SMTP email with HTML formatting"
    }

    async fn initialize(&self, config: &serde_json::Value) -> Result<(), NotifierError> {
        EmailConfig::from_json(config, &self.defaults)
            .map_err(|e| format!("Invalid email configuration: {}", e))?;
        Ok(())
    }

    async fn notify(&self, event: &NotificationEvent, config: &serde_json::Value) -> Result<NotificationResult, NotifierError> {
        let email_config = match EmailConfig::from_json(config, &self.defaults) {
            Ok(c) => c,
            Err(e) => return Ok(NotificationResult::rejected(format!("Invalid email configuration: {}", e))),
        };

        let message = self.build_message(event, &email_config)?;
        let mailer = email_config.transport()?;

        match mailer.send(message).await {
            Ok(response) => {
                let message_id = response.message().next().map(|line| line.to_string());
                debug!("Email sent to {} ({:?})", email_config.to_email, message_id);
                Ok(NotificationResult::delivered(message_id))
            }
            Err(e) => {
                warn!("SMTP delivery to {} failed: {}", email_config.to_email, e);
                Ok(NotificationResult::rejected(e.to_string()))
            }
        }
    }

    async fn test_connection(&self, config: &serde_json::Value) -> Result<bool, NotifierError> {
        let email_config = EmailConfig::from_json(config, &self.defaults)
            .map_err(|e| format!("Invalid email configuration: {}", e))?;

        match email_config.transport()?.test_connection().await {
            Ok(connected) => Ok(connected),
            Err(e) => {
                warn!("SMTP connection test against {} failed: {}", email_config.smtp_server, e);
                Ok(false)
            }
        }
    }

    fn get_config_schema(&self) -> ConfigSchema {
        let field = |name: &str, field_type: ConfigFieldType, label: &str, required: bool, default: Option<serde_json::Value>| ConfigField {
            name: name.to_string(),
            field_type,
            label: label.to_string(),
            required,
            default,
            options: None,
        };

        ConfigSchema {
            fields: vec![
                field("to_email", ConfigFieldType::Text, "Recipient Email", true, None),
                field("smtp_server", ConfigFieldType::Text, "SMTP Server", false, self.defaults.host.clone().map(|h| json!(h))),
                field("smtp_port", ConfigFieldType::Number, "SMTP Port", false, Some(json!(self.defaults.port))),
                field("username", ConfigFieldType::Text, "Username", false, None),
                field("password", ConfigFieldType::Text, "Password", false, None),
                field("from_email", ConfigFieldType::Text, "From Email", false, None),
                field("from_name", ConfigFieldType::Text, "From Name", false, Some(json!(self.defaults.from_name))),
                field("use_tls", ConfigFieldType::Checkbox, "Use TLS", false, Some(json!(self.defaults.use_tls))),
            ],
        }
    }

    fn validate_config(&self, config: &serde_json::Value) -> bool {
        self.get_config_schema().validate(config) && EmailConfig::from_json(config, &self.defaults).is_ok()
    }
}

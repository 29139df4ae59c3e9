//! Digest building and the mail transport seam. Actual delivery is an
//! external collaborator; the in-repo transport logs what would be sent.

use anyhow::Result;
use async_trait::async_trait;
use rfp_crawler::NewRfp;
use tracing::info;

pub const MAIN_SUBJECT: &str = "RFP Scout: New RFPs Found";
pub const DEBUG_SUBJECT: &str = "RFP Scout: Debug Log";

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()>;
}

/// Transport stand-in that writes the digest to the log stream.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()> {
        info!(
            subject = %subject,
            recipients = %recipients.join(", "),
            body_chars = body.len(),
            "Digest ready"
        );
        Ok(())
    }
}

/// Human-readable digest of a run's new rows.
pub fn format_digest(new_rfps: &[NewRfp]) -> String {
    if new_rfps.is_empty() {
        return "No new RFPs found.".to_string();
    }
    let mut body = format!("New RFPs found: {}\n", new_rfps.len());
    for rfp in new_rfps {
        body.push('\n');
        body.push_str(&format!("- {} ({})\n  {}\n", rfp.title, rfp.site, rfp.url));
        if let Some(summary) = &rfp.ai_summary {
            for line in summary.lines() {
                body.push_str("  ");
                body.push_str(line);
                body.push('\n');
            }
        }
    }
    body
}

/// Debug digest: the main body plus the full run log.
pub fn format_debug_digest(new_rfps: &[NewRfp], log_lines: &[String]) -> String {
    format!(
        "{}\n\n--- FULL LOG ---\n{}",
        format_digest(new_rfps),
        log_lines.join("\n")
    )
}

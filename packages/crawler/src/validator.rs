//! Final-page validation and persistence: the deadline check, the scope
//! check, dedup by final URL, summary generation, title selection, and the
//! insert itself. Only definitive rejections write exclusions; anything
//! transient just skips the item so the next run can retry it.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::config::CrawlerConfig;
use crate::links::canonical_url;
use crate::listing::CandidateItem;
use crate::llm::{complete_json, LanguageModel, LlmOptions};
use crate::navigator::FinalPage;
use crate::prompts::{
    build_final_prompt, build_scope_prompt, build_summary_prompt, FINAL_SYSTEM, SCOPE_SYSTEM,
};
use crate::storage::Storage;
use crate::text::{is_generic_title, sanitize_text, truncate_chars};
use crate::types::{
    exclusion_hash, processed_hash, sha256_hex, ExclusionReason, FinalCheck, FinalStatus, NewRfp,
    ProcessedRfp, RfpExclusion, ScopeCheck,
};

const SCOPE_TEXT_CHARS: usize = 12_000;
const FINAL_CHECK_MAX_TOKENS: u32 = 800;
const SCOPE_CHECK_MAX_TOKENS: u32 = 500;
const SUMMARY_MAX_TOKENS: u32 = 1000;

/// Run both model checks against a resolved final page and store the row
/// if it survives. `Ok(None)` means the item was rejected or skipped.
pub async fn validate_and_store(
    llm: &dyn LanguageModel,
    storage: &dyn Storage,
    config: &CrawlerConfig,
    site_name: &str,
    listing_url: &str,
    item: &CandidateItem,
    final_page: &FinalPage,
    summary_cache: &mut HashMap<String, String>,
) -> Result<Option<NewRfp>> {
    let today = config.today();
    let final_url = &final_page.url;

    // Deadline check. A model failure here is transient: skip without
    // excluding so the item is retried next run.
    let final_prompt = build_final_prompt(&final_page.text, final_url, today);
    let options = LlmOptions::with_system(FINAL_SYSTEM).max_tokens(FINAL_CHECK_MAX_TOKENS);
    let check = match complete_json(llm, &final_prompt, &options).await {
        Ok(value) => FinalCheck::from_value(&value),
        Err(e) => {
            warn!(url = %final_url, error = %e, "Final-page classification failed");
            return Ok(None);
        }
    };

    let mut status = check.status;
    if config.final_date_enforce {
        if let Some(deadline) = check.deadline_iso {
            if deadline <= today && status != FinalStatus::Expired {
                info!(
                    url = %final_url,
                    deadline = %deadline,
                    "Deadline not in the future; forcing expired"
                );
                status = FinalStatus::Expired;
            }
        }
    }
    info!(
        url = %final_url,
        status = ?status,
        deadline = ?check.deadline_iso,
        reason = %truncate_chars(&check.reason, 180),
        "Final-page check"
    );

    let reason = match status {
        FinalStatus::Active => None,
        FinalStatus::Expired => Some(ExclusionReason::Expired),
        FinalStatus::Unknown => Some(ExclusionReason::Unknown),
    };
    if let Some(reason) = reason {
        exclude(storage, site_name, listing_url, item, final_url, reason).await?;
        return Ok(None);
    }

    // Scope check, same transient-failure policy.
    let scope_prompt = build_scope_prompt(
        &item.title,
        final_url,
        truncate_chars(&final_page.text, SCOPE_TEXT_CHARS),
    );
    let options = LlmOptions::with_system(SCOPE_SYSTEM).max_tokens(SCOPE_CHECK_MAX_TOKENS);
    let scope = match complete_json(llm, &scope_prompt, &options).await {
        Ok(value) => ScopeCheck::from_value(&value),
        Err(e) => {
            warn!(url = %final_url, error = %e, "Scope classification failed");
            return Ok(None);
        }
    };
    if !scope.in_scope {
        info!(url = %final_url, reason = %scope.reason, "Out of scope");
        exclude(
            storage,
            site_name,
            listing_url,
            item,
            final_url,
            ExclusionReason::OutOfScope,
        )
        .await?;
        return Ok(None);
    }

    if storage
        .processed_url_exists(final_url)
        .await
        .context("Final URL dedup check failed")?
    {
        info!(url = %final_url, "Already processed; skipping duplicate");
        return Ok(None);
    }

    let detail_content = truncate_chars(&final_page.text, config.max_detail_text_chars);
    let ai_summary = if detail_content.trim().is_empty() {
        None
    } else {
        summarize(llm, detail_content, summary_cache).await
    };

    let title = choose_title(&final_page.title, &item.title, ai_summary.as_deref());
    let detail_content = sanitize_text(detail_content);
    let ai_summary = ai_summary.map(|s| sanitize_text(&s));

    let rfp = ProcessedRfp {
        hash: processed_hash(final_url),
        title: title.clone(),
        url: final_url.clone(),
        site: site_name.to_string(),
        processed_at: Utc::now(),
        detail_content: (!detail_content.is_empty()).then_some(detail_content),
        ai_summary,
        pdf_content: final_page.pdf_bytes.clone(),
    };
    storage
        .insert_processed(&rfp)
        .await
        .context("Failed to store accepted RFP")?;
    info!(title = %rfp.title, url = %rfp.url, "Inserted new RFP");

    Ok(Some(NewRfp {
        title: rfp.title,
        url: rfp.url,
        site: rfp.site,
        hash: rfp.hash,
        has_detail: rfp.detail_content.is_some(),
        ai_summary: rfp.ai_summary,
    }))
}

async fn exclude(
    storage: &dyn Storage,
    site_name: &str,
    listing_url: &str,
    item: &CandidateItem,
    final_url: &str,
    reason: ExclusionReason,
) -> Result<()> {
    let exclusion = RfpExclusion {
        hash: exclusion_hash(&item.title, final_url),
        reason,
        title: item.title.clone(),
        site: site_name.to_string(),
        listing_url: listing_url.to_string(),
        detail_url: Some(final_url.to_string()),
        decided_at: Utc::now(),
    };
    storage
        .insert_exclusion(&exclusion)
        .await
        .context("Failed to store exclusion")?;
    // Second row keyed on the listing URL feeds the pre-navigation check.
    let listing_keyed = RfpExclusion {
        hash: exclusion_hash(&item.title, listing_url),
        ..exclusion
    };
    storage
        .insert_exclusion(&listing_keyed)
        .await
        .context("Failed to store exclusion")?;
    info!(
        title = %listing_keyed.title,
        reason = listing_keyed.reason.as_str(),
        "Recorded exclusion"
    );
    Ok(())
}

async fn summarize(
    llm: &dyn LanguageModel,
    detail_content: &str,
    cache: &mut HashMap<String, String>,
) -> Option<String> {
    let key = sha256_hex(detail_content);
    if let Some(hit) = cache.get(&key) {
        return Some(hit.clone());
    }
    let prompt = build_summary_prompt(detail_content);
    let options = LlmOptions {
        max_tokens: SUMMARY_MAX_TOKENS,
        ..Default::default()
    };
    match llm.complete(&prompt, &options).await {
        Ok(summary) => {
            let summary = summary.trim().to_string();
            if !summary.is_empty() {
                cache.insert(key, summary.clone());
                return Some(summary);
            }
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to summarize final page");
            None
        }
    }
}

/// Best available title: final page, then listing, then a heading pulled
/// from the summary, then the listing title regardless.
fn choose_title(final_title: &str, listing_title: &str, summary: Option<&str>) -> String {
    let final_title = final_title.trim();
    if !is_generic_title(final_title) {
        return final_title.to_string();
    }
    let listing_title = listing_title.trim();
    if !is_generic_title(listing_title) {
        return listing_title.to_string();
    }
    if let Some(summary) = summary {
        if let Some(derived) = title_from_summary(summary) {
            return derived;
        }
    }
    listing_title.to_string()
}

/// First summary line that reads like a real title.
fn title_from_summary(summary: &str) -> Option<String> {
    summary
        .lines()
        .take(5)
        .map(|line| {
            line.trim()
                .trim_start_matches(['#', '*', '-'])
                .trim()
                .trim_matches('*')
                .trim()
        })
        .find(|line| line.chars().count() <= 200 && !is_generic_title(line))
        .map(str::to_string)
}

/// A stored row must never point back at its own listing page.
pub fn is_self_referential(final_url: &str, listing_url: &str) -> bool {
    canonical_url(final_url) == canonical_url(listing_url)
}

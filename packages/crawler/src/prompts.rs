//! Prompt construction for the four model calls: listing analysis,
//! navigation, final-page validation, and summarization, plus the compact
//! scope filter. Every prompt embeds today's date so deadline reasoning is
//! anchored.

use std::fmt::Write;

use chrono::NaiveDate;

use crate::links::PageLink;
use crate::types::KnownItem;

pub const LISTING_SYSTEM: &str = "You are a careful web analysis assistant. When returning detail_source_url: \
- It MUST be chosen from the list under \"Top links\" or be a direct .pdf link. \
- Do NOT use the page URL unless it is clearly a single-item detail page (rare for listing pages). \
- Prefer links whose local context mentions the item title or contains descriptive details (e.g., Learn more, Apply, Details, PDF). \
- Prefer deeper, specific paths over general section pages. \
- If you cannot find a suitable detail link for an item, OMIT that item. \
Prefer links that: \
- are marked is_learn_more=true, \
- or have a nearest heading matching the item title, \
- or are is_pdf=true and clearly about the item, \
and avoid links where is_generic_listing=true. \
Scope filter: ONLY include items that are clearly Healthcare IT / public health informatics / health data systems. \
Examples to INCLUDE: data modernization, surveillance systems, registries, LIMS, HIE, EHR/EMR, HL7/FHIR, interoperability, data platforms/warehouses (Snowflake/Azure/AWS/GCP), ETL/ELT, APIs/integration, dashboards/BI/analytics, cloud engineering, cybersecurity for health data. \
Examples to EXCLUDE: construction/facilities, architectural, legal, HR/staffing jobs, direct clinical services, supplies/equipment, travel, printing, events, general marketing/comms, non-IT training not about data systems. \
If topic is ambiguous or not enough information is shown on this page, OMIT it at the listing stage. \
Return strict JSON only, no comments or markdown. IMPORTANT: Only include an item if the date you rely on is clearly a submission / application / proposal deadline (NOT a posted/published/announcement date). If the only visible date is a posted/publish date and there is no explicit deadline language (e.g., Due/Deadline/Closing), omit the item. Your answer will be evaluated primarily by whether detail_link_index correctly references a link in \"Top links\" that provides specific details for the item.";

pub const NAV_SYSTEM: &str = "You are navigating toward the actual full RFP page or PDF. \
At every hop you are given the current page text and its links. \
Decide if CURRENT page is the final RFP (full opportunity details including scope, deadlines, funding, how to apply). \
If yes, return status='final' and no next_link_index. If not, select the single most promising link index to continue navigation. \
If you see clear language that the opportunity is closed/expired/no longer accepting applications, or the expiration date listed is clearly in the past relative to TODAY shown in the prompt, return status='expired' immediately and stop. \
When a date is shown without a year, assume the year is the current year (TODAY) for comparisons. If that makes it in the past, treat it as expired. \
Apply the same Healthcare IT scope filter as the listing step: if the CURRENT page clearly indicates the opportunity is not Healthcare IT / public health informatics / health data systems, return status='give_up'. \
Prefer links that look like they contain full details, PDF downloads, application packets, or solicitations. Avoid navigation loops and generic site pages.";

pub const FINAL_SYSTEM: &str = "You are validating a final RFP/Opportunity page or PDF. \
Return JSON only. Determine if it should be stored as ACTIVE or skipped as EXPIRED. \
ACTIVE only if there is a clear submission/application/proposal deadline that is in the FUTURE relative to TODAY. \
Do not treat posted/published/announcement dates as deadlines. If a date appears without a year, assume the current year (TODAY). \
Do NOT roll month/day forward to next year. If the month/day is earlier than TODAY in the current year, it is in the past.";

pub const SCOPE_SYSTEM: &str = "You decide whether an opportunity is in scope: Healthcare IT / public health informatics / health data systems. \
In scope: data modernization, surveillance systems, registries, LIMS, HIE, EHR/EMR, HL7/FHIR, interoperability, data platforms/warehouses, ETL/ELT, APIs/integration, dashboards/BI/analytics, cloud engineering, cybersecurity for health data. \
Out of scope: construction/facilities, architectural, legal, HR/staffing jobs, direct clinical services, supplies/equipment, travel, printing, events, general marketing/comms, non-IT training. \
Return ONLY strict JSON: {\"in_scope\": true|false, \"reason\": \"short explanation\"}.";

fn format_listing_link(link: &PageLink, index: usize) -> String {
    format!(
        "- [{index}] {} -> {} | heading: {} | context: {} | flags: learn_more={}, apply={}, pdf={}, generic_listing={}, depth={}",
        link.text,
        link.href,
        link.heading,
        link.context,
        link.is_learn_more,
        link.is_apply,
        link.is_pdf,
        link.is_generic_listing,
        link.depth,
    )
}

fn format_nav_link(link: &PageLink, index: usize) -> String {
    format!(
        "- [{index}] {} -> {} | heading: {} | flags: learn_more={}, apply={}, pdf={}, depth={}",
        link.text, link.href, link.heading, link.is_learn_more, link.is_apply, link.is_pdf, link.depth,
    )
}

pub fn build_listing_prompt(
    page_text: &str,
    links: &[PageLink],
    known: &[KnownItem],
    page_url: &str,
    today: NaiveDate,
) -> String {
    let mut existing = String::new();
    for item in known.iter().take(100) {
        let _ = writeln!(existing, "- {} | {}", item.title.trim(), item.url.trim());
    }
    let existing = if existing.is_empty() {
        "(none)".to_string()
    } else {
        existing.trim_end().to_string()
    };
    let link_lines = links
        .iter()
        .enumerate()
        .map(|(i, l)| format_listing_link(l, i))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are analyzing a single web page for RFP/Opportunity items.
You are given:
1) A plain-text snapshot of the page (truncated).
2) A list of anchor links (text + href).
3) A list of existing items already in the database (title + url).
4) Today's date (YYYY-MM-DD): {today}

Scope:
- ONLY include items clearly related to Healthcare IT / public health informatics / health data systems.
- Include: data modernization, certification, registries, LIMS, HIE, EHR/EMR, HL7/FHIR, interoperability, APIs, data platforms/warehouses, ETL/ELT, dashboards/BI/analytics, cloud engineering, cybersecurity for health data.
- Exclude: construction/facilities, architectural, legal, HR/staffing jobs, direct clinical services, supplies/equipment, travel, printing, events, general marketing/comms, non-IT training.
- If uncertain or ambiguous from this page, omit; a later navigation step cannot fix topic mismatch.

Task:
- Identify any new RFP/Opportunity items not already in the database.
- Include consulting/contractor solicitations, RFQs, and RFPs as valid opportunities. Exclude only full-time/part-time employment job postings from HR/careers pages.
- Prefer concrete detail pages or direct PDF links if available.
- detail_source_url must be selected from the provided Top links (anchor list) or be a direct .pdf link on the same site. Do not repeat the page URL unless the page is itself a single-item detail page.
- If the page clearly indicates an opportunity is closed/expired/no-longer accepting applications (e.g., "Closed", "Deadline has passed", "No longer accepting applications", "Application window closed", "Archived", "Award made", "This opportunity is closed"), EXCLUDE the item.
- If a clear deadline is shown on this page, prefer items with a future deadline and ignore those clearly in the past. If a clear deadline is not shown here, you may still include the item if the link appears to lead to a detailed RFP/solicitation page or PDF; a later step will validate deadline/recency.
- Return ONLY strict JSON with this schema:

{{
  "items": [
    {{
      "title": "string (required)",
      "url": "string (required, human-friendly landing/detail URL)",
      "detail_link_index": "integer (required, index of the chosen link from Top links)",
      "detail_source_url": "string (optional, should equal the href of the chosen Top link)",
      "content_snippet": "string (optional, short excerpt from the page supporting the find)"
    }}
  ]
}}

Rules:
- Do not include markdown or comments. JSON only.
- Ensure URLs are absolute and valid (use the provided anchors).
- If nothing new is found, return {{"items":[]}}.
- Listing page URL: {page_url}. Do NOT select this as a detail link.
- Do not treat posted/published/announcement dates as deadlines unless there is explicit deadline language adjacent to them. Terms like "Expiration Date" do count as deadlines when present.
- When a date appears without a year (e.g., "June 3"), assume the current year (TODAY) for comparison; if that makes it clearly in the past, consider the item expired on this page.

Existing DB items (title,url):
{existing}

Page text (truncated):
"""
{page_text}
"""

Top links (indexed, with metadata):
{link_lines}
"#
    )
}

pub fn build_nav_prompt(
    page_text: &str,
    links: &[PageLink],
    known_titles: &[String],
    page_url: &str,
    hop: u32,
    max_hops: u32,
    today: NaiveDate,
) -> String {
    let existing_titles = {
        let joined = known_titles
            .iter()
            .take(40)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        if joined.is_empty() {
            "(none)".to_string()
        } else {
            joined
        }
    };
    let link_lines = links
        .iter()
        .enumerate()
        .map(|(i, l)| format_nav_link(l, i))
        .collect::<Vec<_>>()
        .join("\n");
    let current_year = today.format("%Y");

    format!(
        r#"CURRENT PAGE URL: {page_url}
HOP: {hop}/{max_hops}
TODAY: {today}

Existing final RFPs (titles) for this site (context only):
{existing_titles}

Page text (truncated):
<<<PAGE_TEXT_START>>>
{page_text}
<<<PAGE_TEXT_END>>>

Links (indexed):
{link_lines}

Return ONLY strict JSON with this schema:
{{
    "status": "final" | "continue" | "give_up" | "expired",
    "reason": "short explanation",
    "final": {{
            "title": "string (required if status=final)",
            "url": "string (absolute, required if status=final)"
    }} ,
    "next_link_index": integer (required if status=continue)
}}

Rules:
- status=final only if this page or a direct PDF link is clearly the full RFP.
- status=continue if you are confident another link leads closer to the RFP; pick best next_link_index.
- status=give_up if page is unrelated or no meaningful path after careful inspection.
- status=expired if the page clearly indicates the opportunity is closed/expired/no longer accepting applications, or the expiration date listed is clearly in the past relative to today's date, which is {today}.
- When a date appears without a year (e.g., "June 3"), assume the current year ({current_year}). If that date is before TODAY, treat as expired.
- Do not treat posted/published/announcement dates as deadlines.
- If status=expired, include the exact sentence or line containing the deadline/closing text in the "reason" for auditability.
- No markdown, comments, or extra keys.
"#
    )
}

pub fn build_final_prompt(page_text: &str, page_url: &str, today: NaiveDate) -> String {
    let current_year = today.format("%Y");
    format!(
        r#"TODAY: {today}
PAGE URL: {page_url}

Page content (truncated):
<<<CONTENT_START>>>
{page_text}
<<<CONTENT_END>>>

Return ONLY strict JSON with this schema:
{{
    "status": "active" | "expired" | "unknown",
    "reason": "short explanation",
    "matched_text": "the exact sentence/line containing the deadline/closing language if present, else empty",
    "deadline_iso": "YYYY-MM-DD or null (normalize your interpreted deadline)"
}}

Rules:
- status=active only if there is explicit deadline wording (Due/Deadline/Applications Due/Closing) and the deadline date is in the future relative to TODAY.
- status=expired if the deadline date is clearly in the past or the page states closed/no longer accepting applications.
- When a date appears without a year, assume the current year ({current_year}).
- Do not treat posted/published/announcement dates as deadlines.
- If uncertain, return status="unknown".
- Always provide deadline_iso when status is active or expired. Use the format YYYY-MM-DD. Compare it to TODAY to decide status. Do NOT roll to next year.
"#
    )
}

pub fn build_scope_prompt(title: &str, url: &str, page_text: &str) -> String {
    format!(
        r#"TITLE: {title}
URL: {url}

Content (truncated):
<<<CONTENT_START>>>
{page_text}
<<<CONTENT_END>>>

Is this opportunity in scope? Return ONLY strict JSON: {{"in_scope": true|false, "reason": "short explanation"}}.
"#
    )
}

pub fn build_summary_prompt(rfp_text: &str) -> String {
    format!(
        "Please summarize this RFP provided, separate the details into the following sections\n\
         Summary - A very brief summary of the work:\n\
         Scope of work - A summary of the work to be done, as well as key competencies relevant to completing the work\n\
         Selection Criteria - Anything relevant to being selected, usually a section for this, but might be relevant info elsewhere too\n\
         Application requirements - Copy this section exactly if found, if not found, just mention that it couldn't be found\n\
         Timeline - Focus on the application deadline and project period, as well as any other relevant time related constraints\n\
         Funding - All info related to the funding of the project, like the award amount and hourly pay\n\n\
         Here is the provided RFP, if there is nothing below this line, or it is definitely not an entire RFP (website homepage, etc), just mention that the RFP was not provided:\n\n\
         {rfp_text} "
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::link_of;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()
    }

    #[test]
    fn test_listing_prompt_includes_links_and_known_items() {
        let links = vec![link_of(
            "Learn more",
            "https://a.example/rfps/x",
            "Open RFPs",
            "Surveillance RFP",
        )];
        let known = vec![KnownItem {
            title: "Old RFP".into(),
            url: "https://a.example/old".into(),
        }];
        let prompt =
            build_listing_prompt("PAGE TEXT", &links, &known, "https://a.example/rfps", today());
        assert!(prompt.contains("Today's date (YYYY-MM-DD): 2025-06-08"));
        assert!(prompt.contains("- [0] Learn more -> https://a.example/rfps/x"));
        assert!(prompt.contains("- Old RFP | https://a.example/old"));
        assert!(prompt.contains("Listing page URL: https://a.example/rfps"));
        assert!(prompt.contains(r#"{"items":[]}"#));
    }

    #[test]
    fn test_listing_prompt_empty_known() {
        let prompt = build_listing_prompt("x", &[], &[], "https://a.example/", today());
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_nav_prompt_hop_counter_and_year() {
        let prompt = build_nav_prompt("txt", &[], &[], "https://a.example/d", 2, 5, today());
        assert!(prompt.contains("HOP: 2/5"));
        assert!(prompt.contains("TODAY: 2025-06-08"));
        assert!(prompt.contains("assume the current year (2025)"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_final_prompt_contains_schema() {
        let prompt = build_final_prompt("content", "https://a.example/x.pdf", today());
        assert!(prompt.contains("\"deadline_iso\""));
        assert!(prompt.contains("PAGE URL: https://a.example/x.pdf"));
    }

    #[test]
    fn test_scope_prompt() {
        let prompt = build_scope_prompt("T", "https://a.example/x", "body");
        assert!(prompt.contains("TITLE: T"));
        assert!(prompt.contains("\"in_scope\""));
    }

    #[test]
    fn test_summary_prompt_sections() {
        let prompt = build_summary_prompt("RFP BODY");
        for section in ["Summary", "Scope of work", "Selection Criteria", "Timeline", "Funding"] {
            assert!(prompt.contains(section));
        }
        assert!(prompt.ends_with("RFP BODY "));
    }
}

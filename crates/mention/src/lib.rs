//! Mention & routing logic (spec.md §4.1 "C1").
//!
//! Pure, stateless string functions. No async, no I/O — kept deliberately
//! small and independently testable, the way the teacher keeps its few
//! pure-function modules (e.g. `prompt_builder::truncate_for_prompt`) free
//! of crate-spanning dependencies.

use once_cell::sync::Lazy;
use regex::Regex;

/// `[A-Za-z][\w-]*` — the allowed mention name shape (spec.md §4.1).
const NAME_PATTERN: &str = r"[A-Za-z][\w-]*";

static LEADING_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^@({NAME_PATTERN})[,;:]?\s*")).unwrap());

static ANY_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"@({NAME_PATTERN})")).unwrap());

static WORLD_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<world>\s*(.*?)\s*</world>").unwrap());

/// Repeatedly strips `@name` tokens (with an optional trailing separator and
/// whitespace) from the start of `s`, returning the matched names (lowercased)
/// in order and whatever text remains after the last match.
fn consume_leading_mentions(s: &str) -> (Vec<String>, &str) {
    let mut names = Vec::new();
    let mut rest = s;
    while let Some(caps) = LEADING_MENTION_RE.captures(rest) {
        let whole = caps.get(0).unwrap();
        names.push(caps[1].to_lowercase());
        rest = &rest[whole.end()..];
    }
    (names, rest)
}

/// `@name` mentions appearing at the start of a paragraph (line). Consumes
/// leading lines that are entirely mentions, then stops after the first
/// line whose mentions are followed by real body text (spec.md §4.1,
/// boundary examples in §8).
pub fn paragraph_begin_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    for line in text.split('\n') {
        let trimmed = line.trim_start();
        let (found, remainder) = consume_leading_mentions(trimmed);
        if found.is_empty() {
            break;
        }
        mentions.extend(found);
        if !remainder.trim().is_empty() {
            break;
        }
    }
    mentions
}

pub fn has_any_mention_at_beginning(text: &str) -> bool {
    !paragraph_begin_mentions(text).is_empty()
}

/// All `@name` mentions anywhere in the text (not just paragraph starts),
/// lowercased. Used by `shouldRespond`'s `anyMentions` check.
pub fn extract_mentions(text: &str) -> Vec<String> {
    ANY_MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect()
}

/// Removes `@target` (if given) or any leading `@name` mentions from the
/// start of paragraphs, stopping at the first line that doesn't begin with
/// a (matching) mention. Leading whitespace on partially-stripped lines is
/// preserved.
pub fn strip_mentions_at_paragraph_beginnings(text: &str, target: Option<&str>) -> String {
    let target_lower = target.map(|t| t.to_lowercase());
    let mut out_lines: Vec<String> = Vec::new();
    let mut stripping = true;

    for line in text.split('\n') {
        if !stripping {
            out_lines.push(line.to_string());
            continue;
        }

        let leading_ws_len = line.len() - line.trim_start().len();
        let leading_ws = &line[..leading_ws_len];
        let trimmed = &line[leading_ws_len..];

        let (found, remainder) = strip_matching_leading_mentions(trimmed, target_lower.as_deref());
        if found == 0 {
            stripping = false;
            out_lines.push(line.to_string());
            continue;
        }

        if !remainder.trim().is_empty() {
            stripping = false;
        }
        out_lines.push(format!("{leading_ws}{remainder}"));
    }

    out_lines.join("\n")
}

/// Like [`consume_leading_mentions`] but only consumes mentions matching
/// `target` when one is given (case-insensitive); stops at the first
/// mention that doesn't match. Returns the count consumed and the rest.
fn strip_matching_leading_mentions<'a>(s: &'a str, target: Option<&str>) -> (usize, &'a str) {
    let mut count = 0;
    let mut rest = s;
    while let Some(caps) = LEADING_MENTION_RE.captures(rest) {
        let whole = caps.get(0).unwrap();
        let name = caps[1].to_lowercase();
        if let Some(target) = target {
            if name != target {
                break;
            }
        }
        rest = &rest[whole.end()..];
        count += 1;
    }
    (count, rest)
}

/// Removes every occurrence of `@agentId` anywhere in the text
/// (case-insensitive), not just at paragraph starts.
pub fn remove_self_mentions(text: &str, agent_id: &str) -> String {
    let pattern = format!(r"(?i)@{}\b[,;:]?\s*", regex::escape(agent_id));
    let re = Regex::new(&pattern).expect("agent_id-derived pattern is always valid");
    re.replace_all(text, "").into_owned()
}

/// Parsed `<world>...</world>` control tag (spec.md §6 "World tags").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldTag {
    Stop,
    Done,
    Pass,
    To(Vec<String>),
}

/// Finds the first `<world>...</world>` tag, if any, returning its parsed
/// form and byte range in `text` (so callers can splice it out).
pub fn parse_world_tag(text: &str) -> Option<(WorldTag, std::ops::Range<usize>)> {
    let caps = WORLD_TAG_RE.captures(text)?;
    let whole = caps.get(0).unwrap();
    let inner = caps[1].trim();
    let upper = inner.to_uppercase();

    let tag = if upper == "STOP" {
        WorldTag::Stop
    } else if upper == "DONE" {
        WorldTag::Done
    } else if upper == "PASS" {
        WorldTag::Pass
    } else if let Some(rest) = upper.strip_prefix("TO:") {
        // Recover original-case recipients by slicing the original `inner`
        // at the same offset rather than using the upper-cased copy.
        let original_rest = &inner[rest.len()..inner.len()];
        let recipients = original_rest
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        WorldTag::To(recipients)
    } else {
        return None;
    };

    Some((tag, whole.start()..whole.end()))
}

/// Applies `<world>` tag semantics, falling back to the default
/// "prepend `@sender`" auto-mention when no (recognized) tag is present.
pub fn add_auto_mention(text: &str, sender: &str) -> String {
    if let Some((tag, range)) = parse_world_tag(text) {
        let body = format!("{}{}", &text[..range.start], &text[range.end..]);
        return match tag {
            WorldTag::Stop | WorldTag::Done | WorldTag::Pass => {
                strip_mentions_at_paragraph_beginnings(&body, None)
            }
            WorldTag::To(recipients) if !recipients.is_empty() => {
                let stripped = strip_mentions_at_paragraph_beginnings(&body, None);
                let mentions_block = recipients
                    .iter()
                    .map(|r| format!("@{r}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{mentions_block}\n{}", stripped.trim_start_matches('\n'))
            }
            _ => default_auto_mention(&body, sender),
        };
    }
    default_auto_mention(text, sender)
}

fn default_auto_mention(text: &str, sender: &str) -> String {
    if has_any_mention_at_beginning(text) {
        text.to_string()
    } else {
        format!("@{sender} {text}")
    }
}

/// Whether the orchestrator should call [`add_auto_mention`] on an agent's
/// text reply before publishing it (spec.md §4.1).
///
/// Resolution of an ambiguity in the source spec prose: the literal
/// contract text ("false if sender is human") is followed here rather than
/// the looser narrative aside in scenario S1, since routing mentions exist
/// to direct agent-to-agent traffic — a human reader doesn't need an
/// `@human` tag to find a reply addressed to them. See DESIGN.md.
pub fn should_auto_mention(response: &str, sender: &str, agent_id: &str) -> bool {
    if sender.eq_ignore_ascii_case("human") {
        return false;
    }
    if sender.eq_ignore_ascii_case(agent_id) {
        return false;
    }
    let without_self = remove_self_mentions(response, agent_id);
    extract_mentions(&without_self).is_empty()
}

// Message Builder (spec §4.8) — the heart of the engine.
//
// A pure projection: given a slice of `ConversationEntry` plus a viewing
// context, produce the exact ordered provider message list that one agent
// will see on its next turn. Nothing here touches the network, the clock,
// or disk — every input the projection needs (delegation transcripts,
// AGENTS.md contents) is precomputed by the caller and handed in through
// `BuilderContext`, so the same `(entries, ctx)` pair always produces the
// same output (spec §8 determinism property).
//
// Processing order, matching the spec's subsection order:
// RAL visibility filter -> delegation-completion pruning -> per-entry walk
// (role derivation, attribution, tool-call/tool-result adjacency,
// delegation-marker expansion, AGENTS.md injection, truncation, image
// dedup) -> final multimodal promotion of the last image-bearing user
// message.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tenex_contracts::{ConversationEntry, MarkerStatus, MessageContent, ProviderMessage, Role};

/// One line of a direct child's delegation transcript, pre-filtered to
/// targeted text (spec §4.8: "Transcript body lists only targeted text
/// lines... tool calls and nested markers are omitted").
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedLine {
    pub sender: String,
    pub recipient: String,
    pub content: String,
}

pub const DEFAULT_RECENT_WINDOW: usize = 20;
pub const DEFAULT_TRUNCATION_THRESHOLD_BYTES: usize = 4_000;

const TRUNCATED_PLACEHOLDER_PREFIX: &str = "[Tool result truncated — see tool-call";
const INTERRUPTED_TOOL_RESULT: &str = "[Error: Tool execution was interrupted — result unavailable]";

/// Tool names classified as file-read, for AGENTS.md system-reminder
/// injection (spec §4.8). The engine's own tool schemas are out of scope
/// (spec §1 Non-goals); this is the narrow slice of tool naming convention
/// the Message Builder needs to recognise.
const FILE_READ_TOOLS: &[&str] = &["read_file", "read", "cat", "view_file", "view"];

fn is_file_read_tool(tool_name: &str) -> bool {
    FILE_READ_TOOLS.contains(&tool_name)
}

/// Everything the Message Builder needs beyond the raw entry slice. Built
/// once per `buildAgentMessages` call by the Coordinator, which owns the
/// async work (fetching a delegated child's transcript, walking AGENTS.md
/// ancestors) that produces these fields.
#[derive(Debug, Clone)]
pub struct BuilderContext {
    pub viewing_agent_pubkey: String,
    /// The RAL this call is being built for.
    pub current_ral: u32,
    /// Other RALs that are still active (not yet completed) for the
    /// viewing agent — their entries are excluded from the projection.
    pub active_rals: HashSet<u32>,
    /// Every pubkey known to be an agent, for attribution-prefix rule 4.
    pub agent_pubkeys: HashSet<String>,
    pub conversation_id: String,
    pub project_root: Option<String>,
    /// Precomputed direct-child transcripts, keyed by delegation
    /// conversation id.
    pub delegation_transcripts: HashMap<String, Vec<TargetedLine>>,
    /// Precomputed AGENTS.md contents to inject for a given tool-call id,
    /// nearest ancestor first. Only populated for tool-calls the caller
    /// already resolved as file-reads with a path under `project_root`.
    pub agents_md_by_tool_call: HashMap<String, Vec<String>>,
    /// Status overrides for a delegation, keyed by delegation conversation
    /// id: `(status, abort_reason)`. History is append-only (spec §3), so a
    /// delegation-marker's original `pending` entry is never rewritten in
    /// storage when the delegation later resolves — the Coordinator tracks
    /// the live status in the Delegation Registry and hands it in here so
    /// the projection reflects the current state without mutating history.
    pub marker_status_overrides: HashMap<String, (MarkerStatus, Option<String>)>,
    /// How many of the most recent entries (by position in the slice
    /// handed to this call) are exempt from tool-result truncation.
    pub recent_window: usize,
    pub truncation_threshold_bytes: usize,
}

impl BuilderContext {
    pub fn new(
        viewing_agent_pubkey: impl Into<String>,
        current_ral: u32,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            viewing_agent_pubkey: viewing_agent_pubkey.into(),
            current_ral,
            active_rals: HashSet::new(),
            agent_pubkeys: HashSet::new(),
            conversation_id: conversation_id.into(),
            project_root: None,
            delegation_transcripts: HashMap::new(),
            agents_md_by_tool_call: HashMap::new(),
            marker_status_overrides: HashMap::new(),
            recent_window: DEFAULT_RECENT_WINDOW,
            truncation_threshold_bytes: DEFAULT_TRUNCATION_THRESHOLD_BYTES,
        }
    }

    pub fn with_active_rals(mut self, rals: impl IntoIterator<Item = u32>) -> Self {
        self.active_rals = rals.into_iter().collect();
        self
    }

    pub fn with_agent_pubkeys(mut self, pubkeys: impl IntoIterator<Item = String>) -> Self {
        self.agent_pubkeys = pubkeys.into_iter().collect();
        self
    }

    pub fn with_project_root(mut self, root: impl Into<String>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn with_delegation_transcripts(mut self, transcripts: HashMap<String, Vec<TargetedLine>>) -> Self {
        self.delegation_transcripts = transcripts;
        self
    }

    pub fn with_agents_md_by_tool_call(mut self, map: HashMap<String, Vec<String>>) -> Self {
        self.agents_md_by_tool_call = map;
        self
    }

    pub fn with_marker_status_overrides(
        mut self,
        overrides: HashMap<String, (MarkerStatus, Option<String>)>,
    ) -> Self {
        self.marker_status_overrides = overrides;
        self
    }
}

struct PendingCall {
    tool_name: String,
    insert_index: usize,
}

/// Projects `entries` into the ordered provider message list the viewing
/// agent will see (spec §4.8).
pub fn build_messages(entries: &[ConversationEntry], ctx: &BuilderContext) -> Vec<ProviderMessage> {
    let visible = filter_ral_visibility(entries, ctx);
    let pruned = prune_duplicate_delegation_completions(visible, ctx);

    let mut messages: Vec<ProviderMessage> = Vec::new();
    let mut pending: HashMap<String, PendingCall> = HashMap::new();
    let mut deferred: Vec<ProviderMessage> = Vec::new();
    let mut seen_image_urls: HashSet<String> = HashSet::new();
    let mut injected_agents_md: HashSet<String> = HashSet::new();
    let image_url_re = image_url_regex();

    let total = entries.len();

    for (idx, entry) in pruned {
        match entry {
            ConversationEntry::ToolCall { parts, .. } => {
                for part in parts {
                    let msg = ProviderMessage {
                        role: Role::Assistant,
                        content: MessageContent::Text(
                            serde_json::to_string(&part.input).unwrap_or_default(),
                        ),
                        tool_call_id: Some(part.tool_call_id.clone()),
                        tool_name: Some(part.tool_name.clone()),
                    };
                    push_or_defer(&mut messages, &mut deferred, &pending, msg);
                    pending.insert(
                        part.tool_call_id.clone(),
                        PendingCall {
                            tool_name: part.tool_name.clone(),
                            insert_index: messages.len(),
                        },
                    );
                }
            }
            ConversationEntry::ToolResult { parts, event_id, .. } => {
                let event_id = event_id.clone().unwrap_or_default();
                for part in parts {
                    let is_file_read = pending
                        .get(&part.tool_call_id)
                        .map(|p| is_file_read_tool(&p.tool_name))
                        .unwrap_or(false);

                    let truncated = !is_recent(idx, total, ctx.recent_window)
                        && part.output.len() > ctx.truncation_threshold_bytes;

                    let mut output = if truncated {
                        format!("{TRUNCATED_PLACEHOLDER_PREFIX} {}]", part.tool_call_id)
                    } else {
                        dedup_image_urls(
                            &part.output,
                            &image_url_re,
                            &mut seen_image_urls,
                            &part.tool_name,
                            &event_id,
                        )
                    };

                    if !truncated && ctx.project_root.is_some() && is_file_read {
                        if let Some(contents) = ctx.agents_md_by_tool_call.get(&part.tool_call_id) {
                            let fresh: Vec<&String> = contents
                                .iter()
                                .filter(|c| injected_agents_md.insert((*c).clone()))
                                .collect();
                            if !fresh.is_empty() {
                                output.push_str("\n\n<system-reminder>\n");
                                for c in fresh {
                                    output.push_str(c);
                                    output.push('\n');
                                }
                                output.push_str("</system-reminder>");
                            }
                        }
                    }

                    let msg = ProviderMessage {
                        role: Role::Tool,
                        content: MessageContent::Text(output),
                        tool_call_id: Some(part.tool_call_id.clone()),
                        tool_name: Some(part.tool_name.clone()),
                    };
                    pending.remove(&part.tool_call_id);
                    push_or_defer(&mut messages, &mut deferred, &pending, msg);
                }
                if pending.is_empty() {
                    messages.append(&mut deferred);
                }
            }
            ConversationEntry::Text { .. } => {
                let msg = project_text_entry(entry, ctx);
                if let MessageContent::Text(text) = &msg.content {
                    record_seen_urls(text, &image_url_re, &mut seen_image_urls);
                }
                push_or_defer(&mut messages, &mut deferred, &pending, msg);
            }
            ConversationEntry::DelegationMarker { .. } => {
                let msg = project_delegation_marker(entry, ctx);
                push_or_defer(&mut messages, &mut deferred, &pending, msg);
            }
        }
    }

    // Remaining pending calls were interrupted: insert synthetic results,
    // highest insert_index first so earlier insertions don't shift later
    // ones (spec §4.8).
    let mut remaining: Vec<(String, PendingCall)> = pending.into_iter().collect();
    remaining.sort_by(|a, b| b.1.insert_index.cmp(&a.1.insert_index));
    for (tool_call_id, call) in remaining {
        let msg = ProviderMessage {
            role: Role::Tool,
            content: MessageContent::Text(INTERRUPTED_TOOL_RESULT.to_string()),
            tool_call_id: Some(tool_call_id),
            tool_name: Some(call.tool_name),
        };
        let at = call.insert_index.min(messages.len());
        messages.insert(at, msg);
    }
    messages.append(&mut deferred);

    promote_last_image_user_message(&mut messages, &image_url_re);

    messages
}

fn push_or_defer(
    messages: &mut Vec<ProviderMessage>,
    deferred: &mut Vec<ProviderMessage>,
    pending: &HashMap<String, PendingCall>,
    msg: ProviderMessage,
) {
    if pending.is_empty() {
        messages.push(msg);
    } else {
        deferred.push(msg);
    }
}

fn is_recent(idx: usize, total: usize, recent_window: usize) -> bool {
    total.saturating_sub(recent_window) <= idx
}

// ============================================================================
// RAL visibility filter
// ============================================================================

fn filter_ral_visibility<'a>(
    entries: &'a [ConversationEntry],
    ctx: &BuilderContext,
) -> Vec<(usize, &'a ConversationEntry)> {
    entries
        .iter()
        .enumerate()
        .filter(|&(_, entry)| is_visible(entry, ctx))
        .collect()
}

fn is_visible(entry: &ConversationEntry, ctx: &BuilderContext) -> bool {
    let Some(ral) = entry.ral() else {
        // No RAL: user messages and delegation markers are always visible.
        return true;
    };

    let is_viewer = entry.author_pubkey() == Some(ctx.viewing_agent_pubkey.as_str());
    if is_viewer {
        if ral == ctx.current_ral {
            return true;
        }
        if ctx.active_rals.contains(&ral) {
            return false;
        }
        // A completed RAL of the viewer's own.
        true
    } else {
        // Other agents' non-text entries carrying a RAL are excluded;
        // their text entries remain visible regardless of RAL.
        entry.is_text()
    }
}

// ============================================================================
// Delegation-completion pruning
// ============================================================================

fn prune_duplicate_delegation_completions<'a>(
    entries: Vec<(usize, &'a ConversationEntry)>,
    ctx: &BuilderContext,
) -> Vec<(usize, &'a ConversationEntry)> {
    // A delegation-completion candidate: a text entry at some RAL, targeted
    // at the viewer specifically (rule 4's "[@sender]" attribution case).
    // When several share the same (ral, sender) key, only the latest
    // survives (spec §4.8, scenario 6).
    let mut latest_index: HashMap<(u32, String), usize> = HashMap::new();
    for &(idx, entry) in &entries {
        if let ConversationEntry::Text {
            pubkey,
            ral: Some(ral),
            targeted_pubkeys: Some(targets),
            ..
        } = entry
        {
            if targets.iter().any(|t| t == &ctx.viewing_agent_pubkey) {
                let key = (*ral, pubkey.clone());
                latest_index
                    .entry(key)
                    .and_modify(|cur| *cur = (*cur).max(idx))
                    .or_insert(idx);
            }
        }
    }

    entries
        .into_iter()
        .filter(|&(idx, entry)| {
            let ConversationEntry::Text {
                pubkey,
                ral: Some(ral),
                targeted_pubkeys: Some(targets),
                ..
            } = entry
            else {
                return true;
            };
            if !targets.iter().any(|t| t == &ctx.viewing_agent_pubkey) {
                return true;
            }
            let key = (*ral, pubkey.clone());
            latest_index.get(&key).copied() == Some(idx)
        })
        .collect()
}

// ============================================================================
// Role derivation + attribution (text entries)
// ============================================================================

fn project_text_entry(entry: &ConversationEntry, ctx: &BuilderContext) -> ProviderMessage {
    let ConversationEntry::Text {
        pubkey,
        content,
        targeted_pubkeys,
        sender_pubkey,
        role,
        ..
    } = entry
    else {
        unreachable!("project_text_entry called on a non-text entry");
    };

    let role_value = derive_role(role, sender_pubkey, pubkey, ctx);
    let prefix = attribution_prefix(pubkey, role, targeted_pubkeys, ctx);

    ProviderMessage::text(role_value, format!("{prefix}{content}"))
}

fn derive_role(
    role_override: &Option<String>,
    sender_pubkey: &Option<String>,
    pubkey: &str,
    ctx: &BuilderContext,
) -> Role {
    if let Some(r) = role_override {
        if let Some(parsed) = parse_role(r) {
            return parsed;
        }
    }
    let effective_sender = sender_pubkey.as_deref().unwrap_or(pubkey);
    if effective_sender == ctx.viewing_agent_pubkey {
        Role::Assistant
    } else {
        Role::User
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s.to_ascii_lowercase().as_str() {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        "system" => Some(Role::System),
        _ => None,
    }
}

fn attribution_prefix(
    pubkey: &str,
    role_override: &Option<String>,
    targeted_pubkeys: &Option<Vec<String>>,
    ctx: &BuilderContext,
) -> String {
    if pubkey == ctx.viewing_agent_pubkey {
        return String::new();
    }
    if role_override.is_some() {
        return String::new();
    }
    if let Some(targets) = targeted_pubkeys {
        if !targets.is_empty() && !targets.iter().any(|t| t == &ctx.viewing_agent_pubkey) {
            return format!("[@{} -> @{}] ", pubkey, targets[0]);
        }
    }
    if ctx.agent_pubkeys.contains(pubkey) {
        return format!("[@{}] ", pubkey);
    }
    String::new()
}

// ============================================================================
// Delegation-marker expansion
// ============================================================================

fn project_delegation_marker(entry: &ConversationEntry, ctx: &BuilderContext) -> ProviderMessage {
    let ConversationEntry::DelegationMarker {
        delegation_conversation_id,
        parent_conversation_id,
        recipient_pubkey,
        status,
        abort_reason,
        ..
    } = entry
    else {
        unreachable!("project_delegation_marker called on a non-marker entry");
    };

    let (status, abort_reason) = match ctx.marker_status_overrides.get(delegation_conversation_id) {
        Some((status, reason)) => (status, reason),
        None => (status, abort_reason),
    };

    if parent_conversation_id == &ctx.conversation_id {
        let title = match status {
            MarkerStatus::Completed => "# DELEGATION COMPLETED".to_string(),
            MarkerStatus::Aborted => match abort_reason {
                Some(reason) => format!("# DELEGATION ABORTED: {reason}"),
                None => "# DELEGATION ABORTED".to_string(),
            },
            MarkerStatus::Pending => "# DELEGATION IN PROGRESS".to_string(),
        };
        let body = ctx
            .delegation_transcripts
            .get(delegation_conversation_id)
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| format!("[@{} -> @{}]: {}", l.sender, l.recipient, l.content))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        ProviderMessage::text(Role::User, format!("{title}\n\n{body}"))
    } else {
        let status_str = match status {
            MarkerStatus::Pending => "pending",
            MarkerStatus::Completed => "completed",
            MarkerStatus::Aborted => "aborted",
        };
        let reason_suffix = abort_reason
            .as_ref()
            .map(|r| format!(": {r}"))
            .unwrap_or_default();
        let short = &delegation_conversation_id[..delegation_conversation_id.len().min(12)];
        ProviderMessage::text(
            Role::User,
            format!("[Delegation to @{recipient_pubkey} (conv: {short}…) - {status_str}{reason_suffix}]"),
        )
    }
}

// ============================================================================
// Image placeholder strategy
// ============================================================================

fn image_url_regex() -> Regex {
    Regex::new(r"(?i)https?://[^\s)\]]+\.(?:png|jpe?g|gif|webp|bmp|svg)").expect("static pattern compiles")
}

/// Replaces every occurrence of a previously-seen image URL in `text` with
/// a compact placeholder, leaving the first-ever occurrence (across the
/// whole projection) verbatim. Marks newly-seen URLs in `seen`.
fn dedup_image_urls(
    text: &str,
    re: &Regex,
    seen: &mut HashSet<String>,
    tool_name: &str,
    event_id: &str,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for m in re.find_iter(text) {
        out.push_str(&text[last_end..m.start()]);
        let url = m.as_str();
        if seen.insert(url.to_string()) {
            out.push_str(url);
        } else {
            out.push_str(&format!(
                "[Image: {} | tool: {} | event: {}]",
                basename(url),
                tool_name,
                event_id
            ));
        }
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);
    out
}

/// Records every image URL in `text` as seen without rewriting anything —
/// used for user-authored text, which is never rewritten in place (spec
/// §4.8).
fn record_seen_urls(text: &str, re: &Regex, seen: &mut HashSet<String>) {
    for m in re.find_iter(text) {
        seen.insert(m.as_str().to_string());
    }
}

fn basename(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query.rsplit('/').next().unwrap_or(without_query)
}

/// Converts the single most recent user text message containing an image
/// URL into multimodal form (text + image parts); every earlier
/// image-bearing user message keeps its URLs as plain text (spec §4.8).
fn promote_last_image_user_message(messages: &mut [ProviderMessage], re: &Regex) {
    let target = messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, m)| {
            m.role == Role::User
                && matches!(&m.content, MessageContent::Text(t) if re.is_match(t))
        })
        .map(|(i, _)| i);

    let Some(idx) = target else { return };
    let MessageContent::Text(text) = messages[idx].content.clone() else {
        return;
    };

    let mut parts = Vec::new();
    let mut last_end = 0;
    for m in re.find_iter(&text) {
        if m.start() > last_end {
            parts.push(tenex_contracts::ContentPart::Text {
                text: text[last_end..m.start()].to_string(),
            });
        }
        parts.push(tenex_contracts::ContentPart::Image {
            url: m.as_str().to_string(),
        });
        last_end = m.end();
    }
    if last_end < text.len() {
        parts.push(tenex_contracts::ContentPart::Text {
            text: text[last_end..].to_string(),
        });
    }
    messages[idx].content = MessageContent::Parts(parts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenex_contracts::ToolCallPart;
    use tenex_contracts::ToolResultPart;

    fn text(pubkey: &str, content: &str) -> ConversationEntry {
        ConversationEntry::Text {
            pubkey: pubkey.to_string(),
            content: content.to_string(),
            targeted_pubkeys: None,
            sender_pubkey: None,
            role: None,
            ral: None,
            event_id: None,
        }
    }

    fn ctx(viewer: &str) -> BuilderContext {
        BuilderContext::new(viewer, 1, "conv1")
    }

    #[test]
    fn scenario_1_single_user_message_no_history_block() {
        let entries = vec![text("user1", "@pm review")];
        let messages = build_messages(&entries, &ctx("pm-pub"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content.as_text(), Some("@pm review"));
    }

    #[test]
    fn scenario_3_tool_call_interrupted_by_user_message() {
        let entries = vec![
            ConversationEntry::ToolCall {
                pubkey: "agent".into(),
                ral: 1,
                parts: vec![ToolCallPart {
                    tool_call_id: "c1".into(),
                    tool_name: "search".into(),
                    input: serde_json::json!({}),
                }],
                event_id: None,
            },
            text("user1", "hey?"),
            ConversationEntry::ToolResult {
                pubkey: "agent".into(),
                ral: 1,
                parts: vec![ToolResultPart {
                    tool_call_id: "c1".into(),
                    tool_name: "search".into(),
                    output: "ok".into(),
                }],
                event_id: None,
            },
        ];
        let messages = build_messages(&entries, &ctx("agent"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[2].content.as_text(), Some("hey?"));
    }

    #[test]
    fn scenario_4_orphan_tool_call_gets_synthetic_result() {
        let entries = vec![ConversationEntry::ToolCall {
            pubkey: "agent".into(),
            ral: 1,
            parts: vec![ToolCallPart {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: serde_json::json!({}),
            }],
            event_id: None,
        }];
        let messages = build_messages(&entries, &ctx("agent"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[1].content.as_text(), Some(INTERRUPTED_TOOL_RESULT));
    }

    #[test]
    fn role_override_wins_over_effective_sender() {
        let entry = ConversationEntry::Text {
            pubkey: "someone-else".into(),
            content: "summary".into(),
            targeted_pubkeys: None,
            sender_pubkey: None,
            role: Some("system".into()),
            ral: None,
            event_id: None,
        };
        let messages = build_messages(&[entry], &ctx("viewer"));
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn attribution_prefix_for_targeted_message_excluding_viewer() {
        let entry = ConversationEntry::Text {
            pubkey: "pm".into(),
            content: "go".into(),
            targeted_pubkeys: Some(vec!["dev".into()]),
            sender_pubkey: None,
            role: None,
            ral: None,
            event_id: None,
        };
        let mut c = ctx("other-viewer");
        c.agent_pubkeys.insert("pm".into());
        let messages = build_messages(&[entry], &c);
        assert_eq!(messages[0].content.as_text(), Some("[@pm -> @dev] go"));
    }

    #[test]
    fn attribution_prefix_for_known_agent_sender() {
        let entry = text("pm", "status update");
        let mut c = ctx("dev-pub");
        c.agent_pubkeys.insert("pm".into());
        let messages = build_messages(&[entry], &c);
        assert_eq!(messages[0].content.as_text(), Some("[@pm] status update"));
    }

    #[test]
    fn ral_visibility_excludes_other_active_ral_own_entries() {
        let own_active = ConversationEntry::Text {
            pubkey: "agent".into(),
            content: "mid-flight".into(),
            targeted_pubkeys: None,
            sender_pubkey: None,
            role: None,
            ral: Some(2),
            event_id: None,
        };
        let own_completed = ConversationEntry::Text {
            pubkey: "agent".into(),
            content: "done earlier".into(),
            targeted_pubkeys: None,
            sender_pubkey: None,
            role: None,
            ral: Some(3),
            event_id: None,
        };
        let mut c = ctx("agent");
        c.current_ral = 1;
        c.active_rals.insert(2);
        let messages = build_messages(&[own_active, own_completed], &c);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_text(), Some("done earlier"));
    }

    #[test]
    fn delegation_completion_pruning_keeps_only_latest() {
        let earlier = ConversationEntry::Text {
            pubkey: "dev".into(),
            content: "done v1".into(),
            targeted_pubkeys: Some(vec!["pm".into()]),
            sender_pubkey: None,
            role: None,
            ral: Some(1),
            event_id: None,
        };
        let later = ConversationEntry::Text {
            pubkey: "dev".into(),
            content: "done v2".into(),
            targeted_pubkeys: Some(vec!["pm".into()]),
            sender_pubkey: None,
            role: None,
            ral: Some(1),
            event_id: None,
        };
        let mut c = ctx("pm");
        c.agent_pubkeys.insert("dev".into());
        let messages = build_messages(&[earlier, later], &c);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_text(), Some("done v2"));
    }

    #[test]
    fn direct_child_delegation_marker_expands_transcript() {
        let marker = ConversationEntry::DelegationMarker {
            delegation_conversation_id: "child1".into(),
            parent_conversation_id: "conv1".into(),
            recipient_pubkey: "dev".into(),
            status: MarkerStatus::Completed,
            abort_reason: None,
            completed_at: None,
        };
        let mut c = ctx("pm");
        c.delegation_transcripts.insert(
            "child1".to_string(),
            vec![TargetedLine {
                sender: "dev".into(),
                recipient: "pm".into(),
                content: "implemented it".into(),
            }],
        );
        let messages = build_messages(&[marker], &c);
        let text = messages[0].content.as_text().unwrap();
        assert!(text.starts_with("# DELEGATION COMPLETED"));
        assert!(text.contains("[@dev -> @pm]: implemented it"));
    }

    #[test]
    fn nested_delegation_marker_collapses_to_reference_line() {
        let marker = ConversationEntry::DelegationMarker {
            delegation_conversation_id: "d".repeat(20),
            parent_conversation_id: "some-other-conv".into(),
            recipient_pubkey: "qa".into(),
            status: MarkerStatus::Pending,
            abort_reason: None,
            completed_at: None,
        };
        let messages = build_messages(&[marker], &ctx("pm"));
        let text = messages[0].content.as_text().unwrap();
        assert!(text.starts_with("[Delegation to @qa"));
        assert!(text.contains("pending"));
    }

    #[test]
    fn image_url_deduplication_in_tool_results() {
        let url = "https://example.com/a.png";
        let first = ConversationEntry::ToolResult {
            pubkey: "agent".into(),
            ral: 1,
            parts: vec![ToolResultPart {
                tool_call_id: "c1".into(),
                tool_name: "screenshot".into(),
                output: format!("see {url}"),
            }],
            event_id: Some("evt1".into()),
        };
        let second = ConversationEntry::ToolResult {
            pubkey: "agent".into(),
            ral: 1,
            parts: vec![ToolResultPart {
                tool_call_id: "c2".into(),
                tool_name: "screenshot".into(),
                output: format!("see {url} again"),
            }],
            event_id: Some("evt2".into()),
        };
        let messages = build_messages(&[first, second], &ctx("viewer"));
        let first_text = messages[0].content.as_text().unwrap();
        let second_text = messages[1].content.as_text().unwrap();
        assert!(first_text.contains(url));
        assert!(!second_text.contains(url));
        assert!(second_text.contains("[Image: a.png | tool: screenshot | event: evt2]"));
    }

    #[test]
    fn only_last_user_message_with_image_is_promoted_to_multimodal() {
        let url = "https://example.com/pic.jpg";
        let older = text("user1", &format!("look {url}"));
        let newer = text("user1", &format!("now look {url}"));
        let messages = build_messages(&[older, newer], &ctx("viewer"));
        assert!(matches!(messages[0].content, MessageContent::Text(_)));
        assert!(matches!(messages[1].content, MessageContent::Parts(_)));
    }
}

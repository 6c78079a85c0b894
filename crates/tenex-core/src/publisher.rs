// Agent Event Publisher (spec §4.9)
//
// Encodes an agent's typed "intent" into one or more draft outbound events
// with the correct tags, hands each to an `EventSigner` for signing, then
// hands the signed result to a `RelayPublisher`. Neither signing nor relay
// transport happens in this crate (spec §1 Non-goals) — this module only
// builds the `DraftEvent` shape and drives the two traits.

use std::sync::Arc;

use tenex_contracts::event::{
    TAG_ADDRESSABLE, TAG_MODE, TAG_PHASE, TAG_PUBKEY, TAG_REPLY, TAG_ROOT, TAG_STATUS, TAG_TOOL,
    TAG_TRACE_CONTEXT,
};
use tenex_contracts::{Phase, SignedEvent, Tag};

use crate::decoder::kind;
use crate::error::Result;
use crate::traits::{DraftEvent, EventSigner, RelayPublisher};

/// Observability content-prefix length attached to every outbound event
/// (spec §4.9: "a 50-char content prefix").
const CONTENT_PREFIX_LEN: usize = 50;

/// LLM call metadata attached to an outbound event when the intent carries
/// one (spec §4.9). Cost is rendered with 8 decimal places, matching the
/// spec's USD precision requirement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmUsage {
    pub model: Option<String>,
    pub cost_usd: Option<f64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub context_window: Option<u64>,
    pub max_completion_tokens: Option<u64>,
}

/// One recipient of a fan-out delegation (spec §4.9 `delegation` intent).
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationTarget {
    pub recipient_pubkey: String,
    pub request: String,
    pub branch: Option<String>,
}

/// A typed agent intent, encoded into one or more outbound events by
/// [`AgentEventPublisher::publish`] (spec §4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Reports the delegation this agent was given as finished. Routed
    /// back to the immediate delegator.
    Completion {
        content: String,
        usage: Option<LlmUsage>,
        summary: Option<String>,
        /// Overrides the `p`-tag recipient; defaults to the triggering
        /// event's author when absent (spec §4.9).
        completion_recipient_pubkey: Option<String>,
    },
    /// An ordinary threaded reply within the conversation.
    Conversation {
        content: String,
        is_reasoning: bool,
        usage: Option<LlmUsage>,
    },
    /// Fans out to one or more recipients — one event is produced per
    /// target (spec §4.9).
    Delegation {
        delegations: Vec<DelegationTarget>,
        delegation_type: String,
    },
    /// Advertises a tool invocation for observability.
    ToolUse {
        tool_name: String,
        content: String,
        args: Option<serde_json::Value>,
        referenced_event_ids: Vec<String>,
        referenced_addressable_events: Vec<String>,
        usage: Option<LlmUsage>,
    },
    /// A clarifying question posed back to a human.
    Ask {
        title: String,
        context: String,
        questions: Vec<String>,
    },
    /// A free-form status update.
    Status { content: String },
    /// A lesson learned, linked back to the agent definition it concerns.
    Lesson {
        content: String,
        agent_definition_id: String,
    },
    /// Flags an intervention for human review.
    InterventionReview { content: String, reason: String },
}

/// Context every outbound event needs regardless of intent (spec §4.9
/// "Every outbound event carries...").
#[derive(Debug, Clone)]
pub struct PublishContext {
    /// The project reference tag value, e.g. `"31900:<pub>:<dTag>"`.
    pub project_ref: String,
    pub phase: Phase,
    /// The event that caused this agent turn to run. Also supplies the
    /// threading target: if it carries an `E`-tag (conversation root),
    /// outbound `e`-tags point at that root instead of the triggering
    /// event itself (spec §4.9).
    pub triggering_event: SignedEvent,
    pub cumulative_execution_seconds: u64,
    /// W3C trace-context, injected from the ambient tracing span.
    pub trace_context: Option<String>,
}

impl PublishContext {
    fn thread_root(&self) -> String {
        self.triggering_event
            .conversation_root()
            .map(str::to_string)
            .unwrap_or_else(|| self.triggering_event.id.clone())
    }

    fn ambient_tags(&self) -> Vec<Tag> {
        let root = self.thread_root();
        let mut tags = vec![
            vec![TAG_ADDRESSABLE.to_string(), self.project_ref.clone()],
            vec![TAG_PHASE.to_string(), self.phase.as_str().to_string()],
            vec![TAG_REPLY.to_string(), root.clone(), "reply".to_string()],
            vec![TAG_ROOT.to_string(), root],
            vec![
                "triggered_by".to_string(),
                self.triggering_event.id.clone(),
                content_prefix(&self.triggering_event.content),
            ],
            vec![
                "execution_time".to_string(),
                self.cumulative_execution_seconds.to_string(),
            ],
        ];
        if self.triggering_event.is_voice_mode() {
            tags.push(vec![TAG_MODE.to_string(), "voice".to_string()]);
        }
        if let Some(tc) = &self.trace_context {
            tags.push(vec![TAG_TRACE_CONTEXT.to_string(), tc.clone()]);
        }
        tags
    }
}

fn content_prefix(content: &str) -> String {
    content.chars().take(CONTENT_PREFIX_LEN).collect()
}

fn usage_tags(usage: &Option<LlmUsage>) -> Vec<Tag> {
    let Some(usage) = usage else { return Vec::new() };
    let mut tags = Vec::new();
    if let Some(model) = &usage.model {
        tags.push(vec!["llm_model".to_string(), model.clone()]);
    }
    if let Some(cost) = usage.cost_usd {
        tags.push(vec!["llm_cost_usd".to_string(), format!("{cost:.8}")]);
    }
    if let Some(v) = usage.prompt_tokens {
        tags.push(vec!["llm_prompt_tokens".to_string(), v.to_string()]);
    }
    if let Some(v) = usage.completion_tokens {
        tags.push(vec!["llm_completion_tokens".to_string(), v.to_string()]);
    }
    if let Some(v) = usage.total_tokens {
        tags.push(vec!["llm_total_tokens".to_string(), v.to_string()]);
    }
    if let Some(v) = usage.context_window {
        tags.push(vec!["llm_context_window".to_string(), v.to_string()]);
    }
    if let Some(v) = usage.max_completion_tokens {
        tags.push(vec!["llm_max_completion_tokens".to_string(), v.to_string()]);
    }
    tags
}

/// Encodes `intent` into the draft event(s) it produces (spec §4.9). A
/// `delegation` intent fans out into one draft per recipient; every other
/// intent produces exactly one.
pub fn encode(intent: &Intent, ctx: &PublishContext) -> Vec<DraftEvent> {
    let created_at = ctx.triggering_event.created_at;
    let mut ambient = ctx.ambient_tags();

    match intent {
        Intent::Completion {
            content,
            usage,
            summary: _,
            completion_recipient_pubkey,
        } => {
            let recipient = completion_recipient_pubkey
                .clone()
                .unwrap_or_else(|| ctx.triggering_event.pubkey.clone());
            let mut tags = ambient.clone();
            tags.push(vec![TAG_STATUS.to_string(), "completed".to_string()]);
            tags.push(vec![TAG_TOOL.to_string(), "complete".to_string()]);
            tags.push(vec![TAG_PUBKEY.to_string(), recipient]);
            tags.extend(usage_tags(usage));
            vec![DraftEvent {
                kind: kind::GENERIC_TEXT,
                content: content.clone(),
                tags,
                created_at,
            }]
        }
        Intent::Conversation {
            content,
            is_reasoning,
            usage,
        } => {
            let mut tags = ambient.clone();
            if *is_reasoning {
                tags.push(vec!["reasoning".to_string(), "true".to_string()]);
            }
            tags.extend(usage_tags(usage));
            vec![DraftEvent {
                kind: kind::GENERIC_TEXT,
                content: content.clone(),
                tags,
                created_at,
            }]
        }
        Intent::Delegation {
            delegations,
            delegation_type,
        } => delegations
            .iter()
            .map(|d| {
                let mut tags = ambient.clone();
                tags.push(vec![TAG_PUBKEY.to_string(), d.recipient_pubkey.clone()]);
                tags.push(vec![TAG_TOOL.to_string(), "delegate".to_string()]);
                tags.push(vec!["delegation_type".to_string(), delegation_type.clone()]);
                if let Some(branch) = &d.branch {
                    tags.push(vec!["branch".to_string(), branch.clone()]);
                }
                DraftEvent {
                    kind: kind::GENERIC_TEXT,
                    content: d.request.clone(),
                    tags,
                    created_at,
                }
            })
            .collect(),
        Intent::ToolUse {
            tool_name,
            content,
            args,
            referenced_event_ids,
            referenced_addressable_events,
            usage,
        } => {
            let mut tags = ambient.clone();
            tags.push(vec![TAG_TOOL.to_string(), tool_name.clone()]);
            if let Some(args) = args {
                tags.push(vec!["args".to_string(), args.to_string()]);
            }
            for e in referenced_event_ids {
                tags.push(vec![TAG_REPLY.to_string(), e.clone()]);
            }
            for a in referenced_addressable_events {
                tags.push(vec![TAG_ADDRESSABLE.to_string(), a.clone()]);
            }
            tags.extend(usage_tags(usage));
            vec![DraftEvent {
                kind: kind::GENERIC_TEXT,
                content: content.clone(),
                tags,
                created_at,
            }]
        }
        Intent::Ask {
            title,
            context,
            questions,
        } => {
            let mut tags = ambient.clone();
            tags.push(vec![tenex_contracts::event::TAG_TITLE.to_string(), title.clone()]);
            for q in questions {
                tags.push(vec!["question".to_string(), q.clone()]);
            }
            vec![DraftEvent {
                kind: kind::ASK,
                content: context.clone(),
                tags,
                created_at,
            }]
        }
        Intent::Status { content } => {
            ambient.push(vec![TAG_STATUS.to_string(), "update".to_string()]);
            vec![DraftEvent {
                kind: kind::STATUS_UPDATE,
                content: content.clone(),
                tags: ambient,
                created_at,
            }]
        }
        Intent::Lesson {
            content,
            agent_definition_id,
        } => {
            let mut tags = ambient.clone();
            tags.push(vec![TAG_REPLY.to_string(), agent_definition_id.clone()]);
            vec![DraftEvent {
                kind: kind::LESSON,
                content: content.clone(),
                tags,
                created_at,
            }]
        }
        Intent::InterventionReview { content, reason } => {
            let mut tags = ambient.clone();
            tags.push(vec!["reason".to_string(), reason.clone()]);
            vec![DraftEvent {
                kind: kind::INTERVENTION_REVIEW,
                content: content.clone(),
                tags,
                created_at,
            }]
        }
    }
}

/// Drives `encode` through an [`EventSigner`] and a [`RelayPublisher`].
pub struct AgentEventPublisher {
    signer: Arc<dyn EventSigner>,
    relay: Arc<dyn RelayPublisher>,
}

impl AgentEventPublisher {
    pub fn new(signer: Arc<dyn EventSigner>, relay: Arc<dyn RelayPublisher>) -> Self {
        Self { signer, relay }
    }

    /// Encodes `intent`, signs every resulting draft, publishes each to the
    /// relay, and returns the signed events in encode order.
    pub async fn publish(&self, intent: Intent, ctx: &PublishContext) -> Result<Vec<SignedEvent>> {
        let drafts = encode(&intent, ctx);
        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let signed = self.signer.sign(draft).await?;
            self.relay.publish(signed.clone()).await?;
            out.push(signed);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryRelayPublisher, InMemorySigner};

    fn triggering(id: &str, pubkey: &str, tags: Vec<Vec<&str>>) -> SignedEvent {
        SignedEvent {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            kind: kind::GENERIC_TEXT,
            created_at: 100,
            content: "please review this change".to_string(),
            tags: tags.into_iter().map(|t| t.into_iter().map(str::to_string).collect()).collect(),
        }
    }

    fn ctx(triggering_event: SignedEvent) -> PublishContext {
        PublishContext {
            project_ref: "31900:author:proj".to_string(),
            phase: Phase::Chat,
            triggering_event,
            cumulative_execution_seconds: 42,
            trace_context: Some("00-trace-01".to_string()),
        }
    }

    #[test]
    fn completion_routes_to_triggering_event_author_by_default() {
        let intent = Intent::Completion {
            content: "done".into(),
            usage: None,
            summary: None,
            completion_recipient_pubkey: None,
        };
        let drafts = encode(&intent, &ctx(triggering("req1", "delegator", vec![])));
        assert_eq!(drafts.len(), 1);
        let recipients: Vec<&str> = drafts[0]
            .tags
            .iter()
            .filter(|t| t[0] == "p")
            .map(|t| t[1].as_str())
            .collect();
        assert_eq!(recipients, vec!["delegator"]);
        assert!(drafts[0].tags.iter().any(|t| t == &vec!["status".to_string(), "completed".to_string()]));
    }

    #[test]
    fn completion_recipient_override_wins() {
        let intent = Intent::Completion {
            content: "done".into(),
            usage: None,
            summary: None,
            completion_recipient_pubkey: Some("override-pk".into()),
        };
        let drafts = encode(&intent, &ctx(triggering("req1", "delegator", vec![])));
        let recipients: Vec<&str> = drafts[0]
            .tags
            .iter()
            .filter(|t| t[0] == "p")
            .map(|t| t[1].as_str())
            .collect();
        assert_eq!(recipients, vec!["override-pk"]);
    }

    #[test]
    fn e_tag_replaced_by_conversation_root_when_present() {
        let intent = Intent::Conversation {
            content: "hi".into(),
            is_reasoning: false,
            usage: None,
        };
        let drafts = encode(
            &intent,
            &ctx(triggering("leaf-event", "user", vec![vec!["E", "root-event"]])),
        );
        let e_tag = drafts[0].tags.iter().find(|t| t[0] == "e").unwrap();
        assert_eq!(e_tag[1], "root-event");
    }

    #[test]
    fn delegation_fans_out_one_event_per_recipient() {
        let intent = Intent::Delegation {
            delegations: vec![
                DelegationTarget { recipient_pubkey: "dev".into(), request: "implement X".into(), branch: None },
                DelegationTarget { recipient_pubkey: "qa".into(), request: "test X".into(), branch: Some("feature".into()) },
            ],
            delegation_type: "parallel".into(),
        };
        let drafts = encode(&intent, &ctx(triggering("req1", "pm", vec![])));
        assert_eq!(drafts.len(), 2);
        assert!(drafts[0].tags.iter().any(|t| t == &vec!["p".to_string(), "dev".to_string()]));
        assert!(drafts[1].tags.iter().any(|t| t == &vec!["p".to_string(), "qa".to_string()]));
    }

    #[test]
    fn voice_mode_propagates_from_triggering_event() {
        let intent = Intent::Conversation {
            content: "hi".into(),
            is_reasoning: false,
            usage: None,
        };
        let drafts = encode(&intent, &ctx(triggering("req1", "user", vec![vec!["mode", "voice"]])));
        assert!(drafts[0].tags.iter().any(|t| t == &vec!["mode".to_string(), "voice".to_string()]));
    }

    #[test]
    fn usage_tags_render_cost_with_eight_decimals() {
        let intent = Intent::Conversation {
            content: "hi".into(),
            is_reasoning: false,
            usage: Some(LlmUsage {
                model: Some("claude".into()),
                cost_usd: Some(0.000123),
                prompt_tokens: Some(10),
                completion_tokens: Some(20),
                total_tokens: Some(30),
                context_window: Some(200_000),
                max_completion_tokens: Some(4096),
            }),
        };
        let drafts = encode(&intent, &ctx(triggering("req1", "user", vec![])));
        let cost = drafts[0].tags.iter().find(|t| t[0] == "llm_cost_usd").unwrap();
        assert_eq!(cost[1], "0.00012300");
    }

    #[tokio::test]
    async fn publisher_signs_and_relays_every_draft() {
        let signer = Arc::new(InMemorySigner::new("agent-pub"));
        let relay = InMemoryRelayPublisher::new();
        let publisher = AgentEventPublisher::new(signer, relay.clone());
        let intent = Intent::Delegation {
            delegations: vec![
                DelegationTarget { recipient_pubkey: "dev".into(), request: "go".into(), branch: None },
                DelegationTarget { recipient_pubkey: "qa".into(), request: "go2".into(), branch: None },
            ],
            delegation_type: "parallel".into(),
        };
        let signed = publisher.publish(intent, &ctx(triggering("req1", "pm", vec![]))).await.unwrap();
        assert_eq!(signed.len(), 2);
        assert_eq!(relay.published().await.len(), 2);
    }
}

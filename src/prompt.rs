//! Prompt shaping: routing context injected into agent-bound messages.

/// Marker prefix on inter-agent Matrix bodies. Stripped before re-wrapping
/// so nested headers never stack up.
const INTER_AGENT_BODY_PREFIX: &str = "[Inter-Agent Message from";

/// Matrix localpart prefix identifying OpenCode bridge identities.
pub const OPENCODE_PREFIX: &str = "@oc_";

/// Wrap a message from another agent with sender context and the
/// loop-avoidance system note.
pub fn inter_agent_message(body: &str, from_agent_name: &str, from_agent_id: &str) -> String {
    let payload = strip_inter_agent_prefix(body);
    format!(
        "[INTER-AGENT MESSAGE from {from_agent_name}]\n\
         \n\
         {payload}\n\
         \n\
         ---\n\
         SYSTEM NOTE (INTER-AGENT COMMUNICATION)\n\
         The message above is from another Letta agent: {from_agent_name} (ID: {from_agent_id}).\n\
         Treat this as your MAIN task for this turn; the other agent is trying to\n\
         collaborate with you. Avoid open-ended loops: respond once, do not keep\n\
         the exchange going without new information.\n"
    )
}

/// Drop a leading `[Inter-Agent Message from ...]` line from a body so the
/// wrapper never produces nested headers.
pub fn strip_inter_agent_prefix(body: &str) -> String {
    let mut lines = body.lines();
    match lines.next() {
        Some(first) if first.starts_with(INTER_AGENT_BODY_PREFIX) => {
            let rest: Vec<&str> = lines.collect();
            rest.join("\n").trim_start_matches('\n').to_string()
        }
        _ => body.to_string(),
    }
}

/// Whether a Matrix user id belongs to the OpenCode bridge.
pub fn is_opencode_sender(user_id: &str) -> bool {
    user_id.starts_with(OPENCODE_PREFIX)
}

/// Wrap a message from an OpenCode identity with the response-routing
/// instruction: the agent must @-mention the sender so the OpenCode bridge
/// can route the reply back.
pub fn opencode_message(body: &str, opencode_mxid: &str) -> String {
    format!(
        "[MESSAGE FROM OPENCODE USER]\n\
         \n\
         {body}\n\
         \n\
         ---\n\
         RESPONSE INSTRUCTION (OPENCODE BRIDGE):\n\
         This message is from an OpenCode user: {opencode_mxid}\n\
         When you respond to this message, you MUST include their @mention ({opencode_mxid})\n\
         in your response so the OpenCode bridge can route your reply to them.\n\
         \n\
         Example: \"{opencode_mxid} Here is my response...\"\n"
    )
}

//! State field names and the schemas of the three workflow graphs.

use crate::graph::StateSchema;

// Top-level workflow
pub const MESSAGES: &str = "messages";
pub const RESEARCH_BRIEF: &str = "research_brief";
pub const NEEDS_CLARIFICATION: &str = "needs_clarification";
pub const NOTES: &str = "notes";
pub const RAW_NOTES: &str = "raw_notes";
pub const FINAL_REPORT: &str = "final_report";

// Supervisor
pub const SUPERVISOR_MESSAGES: &str = "supervisor_messages";
pub const RESEARCH_ITERATIONS: &str = "research_iterations";

// Researcher
pub const RESEARCHER_MESSAGES: &str = "researcher_messages";
pub const RESEARCH_TOPIC: &str = "research_topic";
pub const RESEARCH_CYCLES: &str = "research_cycles";
pub const COMPRESSED_RESEARCH: &str = "compressed_research";

pub fn workflow_schema() -> StateSchema {
    StateSchema::new()
        .append(MESSAGES)
        .overwrite(RESEARCH_BRIEF)
        .overwrite(NEEDS_CLARIFICATION)
        .append(NOTES)
        .append(RAW_NOTES)
        .overwrite(FINAL_REPORT)
}

pub fn supervisor_schema() -> StateSchema {
    StateSchema::new()
        .append(SUPERVISOR_MESSAGES)
        .overwrite(RESEARCH_BRIEF)
        .overwrite(RESEARCH_ITERATIONS)
        .append(NOTES)
        .append(RAW_NOTES)
}

pub fn researcher_schema() -> StateSchema {
    StateSchema::new()
        .append(RESEARCHER_MESSAGES)
        .overwrite(RESEARCH_TOPIC)
        .overwrite(RESEARCH_CYCLES)
        .overwrite(COMPRESSED_RESEARCH)
        .append(RAW_NOTES)
}

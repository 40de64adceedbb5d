//! Prompt text for each stage. Every system prompt opens with its stage's
//! role line so transcripts (and test doubles) can tell the stages apart.

pub const SCOPE_ROLE: &str = "You scope research requests.";
pub const SUPERVISOR_ROLE: &str = "You are a research supervisor.";
pub const RESEARCHER_ROLE: &str = "You are a research assistant investigating one topic.";
pub const COMPRESS_ROLE: &str = "You condense research transcripts into notes.";
pub const REPORT_ROLE: &str = "You write final research reports.";

/// Today's date as used in prompts, e.g. `Fri Oct 16, 2026`.
pub fn today() -> String {
    chrono::Local::now().format("%a %b %-d, %Y").to_string()
}

pub fn scope_prompt(date: &str) -> String {
    format!(
        "{SCOPE_ROLE} Today's date is {date}.

Read the conversation and decide whether the request is clear enough to research.
Ask for clarification only when the request is ambiguous, lacks a subject, or uses
acronyms or terms you cannot resolve. Do not ask if the conversation already answers
the question you would ask.

Respond with a single JSON object and nothing else:
{{
  \"needs_clarification\": true or false,
  \"question\": \"the clarifying question, or an empty string\",
  \"research_brief\": \"a detailed research brief in the first person, or an empty string\"
}}

When no clarification is needed, the research brief must restate the request with every
detail the user gave, list open dimensions as open rather than inventing constraints,
and name the preferred sources if the user mentioned any."
    )
}

pub fn supervisor_prompt(date: &str, max_units: usize, max_rounds: usize) -> String {
    format!(
        "{SUPERVISOR_ROLE} Today's date is {date}.

Your job is to answer the research brief by delegating to research assistants with the
`conduct_research` tool. Each call starts one assistant on one self-contained topic; the
assistant cannot see the brief or other topics, so describe the topic fully.

Rules:
- Use `think` before delegating to plan, and after results come back to judge what is missing.
- Start no more than {max_units} `conduct_research` calls at once. Parallelize only when
  topics are clearly independent, such as comparing distinct items.
- A simple fact-finding question needs a single assistant.
- You have at most {max_rounds} delegation rounds.
- Call `research_complete` as soon as the findings are enough to write a comprehensive answer."
    )
}

pub fn researcher_prompt(date: &str, tools: &[&str]) -> String {
    format!(
        "{RESEARCHER_ROLE} Today's date is {date}.

Gather information on the topic given by the user message using the available tools:
{tools}

Work like a careful human researcher. Start with broad searches or directory listings,
narrow down as you learn, and use `think` after each tool result to note what you found
and what is still missing. Stop calling tools when you can answer the topic confidently,
when further searches return the same information, or after about five tool calls.
When you stop, reply with your findings in plain text.",
        tools = tools
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

pub fn compress_system_prompt(date: &str) -> String {
    format!(
        "{COMPRESS_ROLE} Today's date is {date}.

You receive the transcript of a research assistant's work: its reasoning, the tools it
called, and what those tools returned. Rewrite every relevant fact into a clean,
complete set of findings. Do not summarize away information; remove only duplication
and irrelevant chatter. Keep the source of each fact and finish with a numbered list of
sources (title and URL or file path)."
    )
}

pub fn compress_human_message(topic: &str, transcript: &str) -> String {
    format!(
        "Research topic: {topic}

Transcript:
{transcript}

Clean up these findings. Preserve every relevant statement and source verbatim where possible."
    )
}

pub fn report_prompt(date: &str, brief: &str, notes: &[String]) -> String {
    let findings = if notes.is_empty() {
        "(no findings were gathered)".to_string()
    } else {
        notes.join("\n\n---\n\n")
    };
    format!(
        "{REPORT_ROLE} Today's date is {date}.

Research brief:
{brief}

Findings:
{findings}

Write a well-structured report in markdown that answers the brief using the findings.
Use headings, cite sources inline with numbers, and end with a `### Sources` section
listing each source once. Write in the same language as the brief."
    )
}

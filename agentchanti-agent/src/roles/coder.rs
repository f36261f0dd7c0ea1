//! Coder: plan (+ feedback) -> source files
//!
//! With chunk edits enabled a revision shows the previous files split into
//! chunks and accepts `[EDIT]`/`[NEW]` blocks, falling back to whole files.

use crate::agent::Role;
use crate::artifact::{CodeArtifact, Feedback, Plan, Task};
use crate::chunk::{self, Chunk, ChunkEdit};
use crate::config::OrchestratorConfig;
use crate::parse;
use agentchanti_llm::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert programmer. You write complete, runnable code \
and nothing else.";

/// The previous attempt and what was wrong with it
#[derive(Debug, Clone)]
pub struct Revision {
    pub artifact: CodeArtifact,
    pub feedback: Feedback,
}

#[derive(Debug, Clone)]
pub struct CoderInput {
    pub task: Task,
    pub plan: Plan,
    /// `None` on the first invocation
    pub revision: Option<Revision>,
}

pub struct Coder {
    language: String,
    default_filename: String,
    max_feedback_chars: usize,
    chunk_edits: bool,
}

impl Coder {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            language: config.language.clone(),
            default_filename: config.default_filename.clone(),
            max_feedback_chars: config.max_feedback_chars,
            chunk_edits: config.chunk_edits,
        }
    }

    fn render_chunk_revision(&self, revision: &Revision) -> String {
        let feedback = self.render_feedback(&revision.feedback);
        let chunks: Vec<Chunk> = revision
            .artifact
            .files()
            .iter()
            .flat_map(|(path, content)| chunk::chunk_file(path, content))
            .collect();
        let targets = chunk::target_chunks(&chunks, &feedback);
        let shown = (!targets.is_empty()).then_some(targets.as_slice());

        format!(
            "Your previous attempt (version {version}), split into chunks:\n\n{chunks}\n\n{feedback}\n\n\
             Fix every issue above by changing only the chunks that need it.\n\
             Replace a chunk, giving the line range shown for it:\n\
             #### [EDIT]: <file>:<chunk id> (lines <start>-<end>)\n\
             ```{lang}\n\
             <the complete new chunk>\n\
             ```\n\
             Add code below a line of a file:\n\
             #### [NEW]: <file> (after line <n>)\n\
             ```{lang}\n\
             <the new code>\n\
             ```\n\
             To rewrite whole files instead, answer only with `#### [FILE]: <file>` blocks \
             holding the complete content of each file you change.",
            version = revision.artifact.version(),
            chunks = chunk::render_chunks(&chunks, shown),
            feedback = feedback,
            lang = self.language,
        )
    }

    fn parse_files(&self, response: &str) -> Result<BTreeMap<String, String>> {
        let files = parse::parse_code_blocks(response);
        if !files.is_empty() {
            return Ok(files);
        }

        match parse::first_code_block(response) {
            Some(code) => {
                let mut files = BTreeMap::new();
                files.insert(self.default_filename.clone(), code);
                Ok(files)
            }
            None => Err(Error::malformed_output("coder", "response contains no code")
                .with_operation("coder::parse")),
        }
    }

    /// Apply chunk edits to the previous files, or merge rewritten files
    /// over them when the response carries no edits
    fn parse_revision(
        &self,
        previous: &CodeArtifact,
        response: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut files = previous.files().clone();

        if let Some(edits) = chunk::parse_chunk_edits(response) {
            let mut by_path: BTreeMap<String, Vec<ChunkEdit>> = BTreeMap::new();
            for edit in edits {
                by_path.entry(edit.path.clone()).or_default().push(edit);
            }

            let mut applied = 0;
            for (path, edits) in by_path {
                match previous.get(&path) {
                    Some(original) => {
                        let known = chunk::chunk_file(&path, original);
                        let updated = chunk::apply_chunk_edits(original, &edits, &known);
                        applied += edits.len();
                        files.insert(path, updated);
                    }
                    None if edits.iter().all(|e| e.insert_after.is_some()) => {
                        let content: Vec<&str> =
                            edits.iter().map(|e| e.content.trim_end_matches('\n')).collect();
                        applied += edits.len();
                        files.insert(path, format!("{}\n", content.join("\n")));
                    }
                    None => {
                        warn!(path = %path, edits = edits.len(), "edits name a file that does not exist");
                    }
                }
            }

            if applied == 0 {
                return Err(Error::malformed_output(
                    "coder",
                    "chunk edits do not name any file of the previous attempt",
                )
                .with_operation("coder::parse"));
            }
            debug!(applied, "applied chunk edits");
            return Ok(files);
        }

        files.extend(self.parse_files(response)?);
        Ok(files)
    }

    fn render_feedback(&self, feedback: &Feedback) -> String {
        match feedback {
            Feedback::Review(review) => format!(
                "The reviewer rejected it:\n{}",
                truncate_tail(review.feedback.trim(), self.max_feedback_chars)
            ),
            Feedback::Test(test) if test.timed_out => format!(
                "The tests did not finish in time (possible infinite loop or blocking call):\n{}",
                truncate_tail(&test.output, self.max_feedback_chars)
            ),
            Feedback::Test(test) => {
                let code = test
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                format!(
                    "The tests failed (exit code {}):\n{}",
                    code,
                    truncate_tail(&test.output, self.max_feedback_chars)
                )
            }
        }
    }
}

impl Role for Coder {
    type Input = CoderInput;
    type Output = BTreeMap<String, String>;

    fn name(&self) -> &'static str {
        "coder"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn render(&self, input: &CoderInput) -> String {
        let mut prompt = format!(
            "Task: {}\n\nPlan:\n{}\n\n",
            input.task,
            input.plan.render()
        );

        if let Some(revision) = input.revision.as_ref().filter(|_| self.chunk_edits) {
            prompt.push_str(&self.render_chunk_revision(revision));
            return prompt;
        }

        if let Some(revision) = &input.revision {
            prompt.push_str(&format!(
                "Your previous attempt (version {}):\n{}\n\n{}\n\n\
                 Fix every issue above and return the complete corrected files.\n\n",
                revision.artifact.version(),
                revision.artifact.render_for_prompt(),
                self.render_feedback(&revision.feedback)
            ));
        }

        prompt.push_str(&format!(
            "Write the {} code that implements the plan. Provide only the code, complete and runnable.\n\
             Give every file a header line followed by a fenced code block:\n\
             #### [FILE]: {}\n\
             ```{}\n\
             # code here\n\
             ```",
            self.language, self.default_filename, self.language
        ));
        prompt
    }

    fn parse(&self, input: &CoderInput, response: &str) -> Result<BTreeMap<String, String>> {
        match &input.revision {
            Some(revision) if self.chunk_edits => self.parse_revision(&revision.artifact, response),
            _ => self.parse_files(response),
        }
    }
}

/// Keep the last `max_chars` characters; failures are reported at the end
fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("…{}", tail)
}

//! Console confirmation prompts

use std::io::{self, BufRead, Write};

use crate::database::format_table;
use crate::decision::{ConfirmRequest, Decision, DecisionProvider};

/// Shows each request as a table on stdout and reads the answer from stdin
///
/// `c` (or an empty line) continues, `s` skips where skipping is offered,
/// `q` cancels. End of input cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }

    /// Present `request` on `output` and read answers from `input` until one is valid
    pub fn ask<R: BufRead, W: Write>(
        &self,
        request: &ConfirmRequest,
        input: &mut R,
        output: &mut W,
    ) -> io::Result<Decision> {
        writeln!(output)?;
        writeln!(output, "== {} ==", request.title)?;
        writeln!(output, "{}", request.message)?;
        writeln!(output)?;
        writeln!(output, "{}", format_table(&request.result))?;
        if let Some(compare) = &request.compare {
            writeln!(output)?;
            writeln!(output, "Existing data:")?;
            writeln!(output, "{}", format_table(compare))?;
        }

        loop {
            write!(output, "{} [c]: ", choice_hint(request.choices))?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(Decision::Cancel);
            }
            match parse_answer(&line, request.choices) {
                Some(index) => return Ok(Decision::from_choice(index, request.choices)),
                None => writeln!(output, "Please answer one of the listed letters.")?,
            }
        }
    }
}

impl DecisionProvider for ConsolePrompt {
    fn confirm(&self, request: &ConfirmRequest) -> Decision {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        self.ask(request, &mut stdin.lock(), &mut stdout)
            .unwrap_or(Decision::Cancel)
    }
}

fn choice_hint(choices: &[&str]) -> String {
    choices
        .iter()
        .map(|choice| format!("{} ({})", choice, key_for(choice)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_for(choice: &str) -> char {
    match choice {
        "Cancel" => 'q',
        other => other
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or('?'),
    }
}

/// Index of the choice named by `answer`
fn parse_answer(answer: &str, choices: &[&str]) -> Option<usize> {
    let answer = answer.trim().to_lowercase();
    if answer.is_empty() {
        return Some(0);
    }
    choices.iter().position(|choice| {
        answer == choice.to_lowercase() || answer.chars().eq(std::iter::once(key_for(choice)))
    })
}

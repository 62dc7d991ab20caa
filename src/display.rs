//! Terminal presentation of a comparison run.

use colored::*;

use crate::consumer::{Phase, StreamState};
use crate::providers::ModelSelector;

pub fn print_header(prompt: &str, endpoint: &str) {
    println!("{}", "DUET RELAY: SIDE-BY-SIDE".bright_cyan().bold());
    println!("{}: {}", "Relay".bright_yellow(), endpoint);
    println!("{}: {}", "Prompt".bright_yellow(), prompt);
    println!("{}", "=".repeat(50).bright_blue());
}

fn phase_badge(phase: Phase) -> ColoredString {
    match phase {
        Phase::Idle => "idle".normal(),
        Phase::Streaming => "streaming".bright_cyan(),
        Phase::Completed => "done".bright_green(),
        Phase::Cancelled => "stopped".bright_yellow(),
        Phase::Failed => "failed".bright_red(),
    }
}

/// One column rendered as a titled block; the error, when present, is shown
/// in place of the text.
pub fn render_panel(model: ModelSelector, state: &StreamState) -> String {
    let title = format!("── {} [{}] ", model.label(), phase_badge(state.phase));
    let mut out = format!("{}\n", title.bold());
    match &state.last_error {
        Some(err) => out.push_str(&format!("{}\n", err.bright_red())),
        None if state.accumulated_text.is_empty() => {
            out.push_str(&format!("{}\n", "(no output)".dimmed()))
        }
        None => {
            out.push_str(&state.accumulated_text);
            out.push('\n');
        }
    }
    out
}

pub fn print_footer(gpt: &StreamState, gemini: &StreamState) {
    println!("{}", "=".repeat(50).bright_blue());
    println!(
        "{}: gpt {} chars, gemini {} chars",
        "Output".bright_yellow(),
        gpt.accumulated_text.chars().count(),
        gemini.accumulated_text.chars().count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(text: &str, phase: Phase, error: Option<&str>) -> StreamState {
        StreamState {
            accumulated_text: text.to_string(),
            is_active: phase == Phase::Streaming,
            last_error: error.map(str::to_string),
            phase,
        }
    }

    #[test]
    fn test_panel_shows_text() {
        let p = render_panel(ModelSelector::Gpt, &state("Hi there", Phase::Completed, None));
        assert!(p.contains("GPT"));
        assert!(p.contains("done"));
        assert!(p.contains("Hi there"));
    }

    #[test]
    fn test_panel_shows_error() {
        let p = render_panel(
            ModelSelector::Gemini,
            &state("", Phase::Failed, Some("relay responded 400: Invalid model")),
        );
        assert!(p.contains("Gemini"));
        assert!(p.contains("Invalid model"));
        assert!(!p.contains("(no output)"));
    }

    #[test]
    fn test_panel_empty_output() {
        let p = render_panel(ModelSelector::Gpt, &state("", Phase::Cancelled, None));
        assert!(p.contains("stopped"));
        assert!(p.contains("(no output)"));
    }
}

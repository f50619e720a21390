//! Interactive variant selection.

use bili_api::{EncodingVariant, VariantPicker};
use indicatif::MultiProgress;
use inquire::{InquireError, Select};
use tracing::warn;

/// Prompt collaborator over `inquire::Select`. Progress rendering is
/// suspended while the prompt owns the terminal; Esc or Ctrl-C on the prompt
/// reads as cancellation, which ends the run cleanly.
pub struct SelectPicker {
    multi: MultiProgress,
}

impl SelectPicker {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl VariantPicker for SelectPicker {
    fn pick(&self, label: &str, choices: &[EncodingVariant]) -> Option<usize> {
        self.multi.suspend(|| {
            let options: Vec<String> = choices.iter().map(ToString::to_string).collect();
            match Select::new(label, options).raw_prompt() {
                Ok(selection) => Some(selection.index),
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => None,
                Err(err) => {
                    // A broken terminal cannot be distinguished from a user
                    // that cannot answer; treat it as a cancelled pick.
                    warn!(error = %err, "prompt failed");
                    None
                }
            }
        })
    }
}

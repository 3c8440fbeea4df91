//! Acceptance-probability gate for automatic triggers.
//!
//! A logistic model estimates how likely the user is to accept a suggestion
//! at this cursor position; automatic requests scoring below the configured
//! threshold are rejected before any backend work happens. Manual and
//! continuation triggers bypass the gate.

use chrono::Utc;
use serde_json::json;

use crate::errors::RejectCode;
use crate::filters::{AdmissionFilter, Verdict};
use crate::language::Lang;
use crate::models::{CompletionRequest, HideScoreInput, ProcessedPrompt, TriggerMode};

/// Base feature weights, in feature order:
/// previous label, whitespace after cursor, log seconds since previous
/// label, log cursor-line length, log stripped cursor-line length, log
/// document length, log cursor position, relative cursor position.
const BASE_WEIGHTS: [f64; 8] = [0.99, 0.70, -0.17, -0.22, 0.13, -0.007, 0.005, 0.41];

const INTERCEPT: f64 = -1.13;

/// Language one-hot weights, indexed by `Lang::model_index` (trailing slot
/// is the unknown-language default).
const LANGUAGE_WEIGHTS: [f64; Lang::MODEL_SLOTS] = [
    0.21, 0.14, 0.17, 0.19, 0.08, 0.05, 0.04, 0.16, -0.02, 0.07, 0.11, 0.09, 0.03, 0.01, -0.12,
    -0.19, -0.06, -0.04, 0.02, 0.06, -0.08,
];

/// One-hot weights for the last character of the prefix, one slot per
/// printable ASCII code point (0x20..=0x7F); characters outside the range
/// contribute nothing.
const PREFIX_CHAR_WEIGHTS: [f64; 96] = [
    // 0x20..0x27:   ! " # $ % & '
    0.31, -0.24, 0.05, -0.11, -0.03, -0.15, 0.09, 0.04,
    // 0x28..0x2F: ( ) * + , - . /
    0.42, -0.38, 0.07, 0.22, 0.35, 0.12, 0.44, -0.02,
    // 0x30..0x37: 0 1 2 3 4 5 6 7
    -0.09, -0.07, -0.05, -0.08, -0.06, -0.04, -0.07, -0.05,
    // 0x38..0x3F: 8 9 : ; < = > ?
    -0.06, -0.08, 0.28, -0.51, 0.13, 0.47, -0.33, -0.10,
    // 0x40..0x47: @ A B C D E F G
    0.11, 0.06, 0.03, 0.05, 0.02, 0.04, 0.03, 0.05,
    // 0x48..0x4F: H I J K L M N O
    0.04, 0.06, 0.01, 0.02, 0.04, 0.03, 0.05, 0.02,
    // 0x50..0x57: P Q R S T U V W
    0.03, 0.01, 0.05, 0.06, 0.04, 0.02, 0.01, 0.03,
    // 0x58..0x5F: X Y Z [ \ ] ^ _
    0.02, 0.01, 0.02, 0.25, -0.05, -0.27, -0.08, 0.15,
    // 0x60..0x67: ` a b c d e f g
    0.06, 0.09, 0.07, 0.08, 0.10, 0.12, 0.08, 0.07,
    // 0x68..0x6F: h i j k l m n o
    0.08, 0.10, 0.05, 0.06, 0.09, 0.08, 0.11, 0.10,
    // 0x70..0x77: p q r s t u v w
    0.09, 0.04, 0.11, 0.10, 0.12, 0.08, 0.06, 0.07,
    // 0x78..0x7F: x y z { | } ~ DEL
    0.05, 0.06, 0.04, 0.39, -0.07, -0.45, -0.12, 0.0,
];

/// Same layout as `PREFIX_CHAR_WEIGHTS`, applied to the last character of
/// the right-stripped prefix.
const RSTRIP_CHAR_WEIGHTS: [f64; 96] = [
    // 0x20..0x27:   ! " # $ % & '
    0.02, -0.18, 0.03, -0.09, -0.02, -0.11, 0.06, 0.03,
    // 0x28..0x2F: ( ) * + , - . /
    0.36, -0.29, 0.05, 0.18, 0.27, 0.09, 0.33, -0.01,
    // 0x30..0x37: 0 1 2 3 4 5 6 7
    -0.07, -0.06, -0.04, -0.06, -0.05, -0.03, -0.05, -0.04,
    // 0x38..0x3F: 8 9 : ; < = > ?
    -0.05, -0.06, 0.24, -0.43, 0.10, 0.38, -0.26, -0.08,
    // 0x40..0x47: @ A B C D E F G
    0.08, 0.05, 0.02, 0.04, 0.02, 0.03, 0.02, 0.04,
    // 0x48..0x4F: H I J K L M N O
    0.03, 0.05, 0.01, 0.02, 0.03, 0.02, 0.04, 0.02,
    // 0x50..0x57: P Q R S T U V W
    0.02, 0.01, 0.04, 0.05, 0.03, 0.02, 0.01, 0.02,
    // 0x58..0x5F: X Y Z [ \ ] ^ _
    0.02, 0.01, 0.01, 0.20, -0.04, -0.21, -0.06, 0.12,
    // 0x60..0x67: ` a b c d e f g
    0.05, 0.07, 0.06, 0.06, 0.08, 0.09, 0.06, 0.06,
    // 0x68..0x6F: h i j k l m n o
    0.06, 0.08, 0.04, 0.05, 0.07, 0.06, 0.09, 0.08,
    // 0x70..0x77: p q r s t u v w
    0.07, 0.03, 0.09, 0.08, 0.09, 0.06, 0.05, 0.06,
    // 0x78..0x7F: x y z { | } ~ DEL
    0.04, 0.05, 0.03, 0.31, -0.05, -0.36, -0.09, 0.0,
];

pub struct HiddenScoreFilter {
    threshold: f64,
}

impl HiddenScoreFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    fn score(&self, input: &HideScoreInput, prompt: &ProcessedPrompt, lang: Lang, now_ms: i64) -> f64 {
        let seconds_since_label =
            ((now_ms - input.previous_label_timestamp_ms).max(0) as f64) / 1000.0;

        let stripped = prompt.prefix.trim_end();
        let mut z = INTERCEPT;
        z += BASE_WEIGHTS[0] * input.previous_label as f64;
        z += BASE_WEIGHTS[1] * if input.is_whitespace_after_cursor { 1.0 } else { 0.0 };
        z += BASE_WEIGHTS[2] * (1.0 + seconds_since_label.max(3.6)).ln();
        z += BASE_WEIGHTS[3] * (1.0 + last_line_len(&prompt.prefix) as f64).ln();
        z += BASE_WEIGHTS[4] * (1.0 + last_line_len(stripped) as f64).ln();
        z += BASE_WEIGHTS[5] * (1.0 + input.document_length as f64).ln();
        z += BASE_WEIGHTS[6] * (1.0 + input.prompt_end_pos as f64).ln();
        z += BASE_WEIGHTS[7]
            * (input.prompt_end_pos as f64 + 0.5) / (1.0 + input.document_length as f64);

        z += LANGUAGE_WEIGHTS[lang.model_index()];
        if let Some(class) = prompt.prefix.chars().last().and_then(char_class) {
            z += PREFIX_CHAR_WEIGHTS[class];
        }
        if let Some(class) = stripped.chars().last().and_then(char_class) {
            z += RSTRIP_CHAR_WEIGHTS[class];
        }

        sigmoid(z)
    }
}

impl AdmissionFilter for HiddenScoreFilter {
    fn name(&self) -> &'static str {
        "hidden_score"
    }

    fn judge(&self, req: &mut CompletionRequest, prompt: &ProcessedPrompt) -> Verdict {
        if matches!(req.trigger_mode, TriggerMode::Manual | TriggerMode::Continue) {
            return Verdict::Accepted;
        }
        let Some(input) = req.calculate_hide_score.clone() else {
            return Verdict::Accepted;
        };

        let lang = Lang::from_language_id(&req.language_id);
        let score = self.score(&input, prompt, lang, Utc::now().timestamp_millis());
        req.extra.insert("hideScore".to_string(), json!(score));

        if score < self.threshold {
            Verdict::Rejected(RejectCode::LowHiddenScore)
        } else {
            Verdict::Accepted
        }
    }
}

/// Character length of the last line.
fn last_line_len(text: &str) -> usize {
    text.rsplit('\n').next().unwrap_or_default().chars().count()
}

/// One-hot slot for a printable ASCII character; anything else contributes
/// nothing to the score.
fn char_class(c: char) -> Option<usize> {
    let code = c as u32;
    (0x20..=0x7F).contains(&code).then(|| (code - 0x20) as usize)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Deserialize;
use serde::Serialize;

use crate::hash::content_hash;

/// Loads MathJax on clients that do not bundle it (AnkiDroid, older
/// desktop versions) and typesets the card.
pub const CARD_MATHJAX_CONTENT: &str = r#"<script type="text/x-mathjax-config">
MathJax.Hub.processSectionDelay = 0;
MathJax.Hub.Config({
  messageStyle: 'none',
  tex2jax: {
    inlineMath: [['\\(', '\\)']],
    displayMath: [['\\[', '\\]']],
    processEscapes: true
  }
});
</script>
<script type="text/javascript">
(function() {
  if (window.MathJax != null) {
    var card = document.querySelector('.card');
    MathJax.Hub.Queue(['Typeset', MathJax.Hub, card]);
    return;
  }
  var script = document.createElement('script');
  script.type = 'text/javascript';
  script.src = 'https://cdnjs.cloudflare.com/ajax/libs/mathjax/2.7.1/MathJax.js?config=TeX-MML-AM_CHTML';
  document.body.appendChild(script);
})();
</script>
"#;

pub const DEFAULT_MODEL_NAME: &str = "Ankdown Model 2";

pub const DEFAULT_MODEL_CSS: &str = "
.card {
    font-family: 'Crimson Pro', 'Crimson Text', 'Cardo', 'Times', 'serif';
    text-align: center;
    color: black;
    background-color: white;
}
";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
}

/// A card template. `qfmt` renders the question side, `afmt` the answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplate {
    pub name: String,
    pub qfmt: String,
    pub afmt: String,
}

/// The note type every card is created with.
#[derive(Clone, Debug, PartialEq)]
pub struct CardModel {
    pub name: String,
    pub css: String,
    pub fields: Vec<ModelField>,
    pub templates: Vec<ModelTemplate>,
}

impl CardModel {
    /// Models are identified by the hash of their name.
    pub fn id(&self) -> u64 {
        content_hash(&self.name)
    }

    pub fn default_fields() -> Vec<ModelField> {
        ["Question", "Answer", "Tags"]
            .into_iter()
            .map(|name| ModelField {
                name: name.to_string(),
            })
            .collect()
    }

    pub fn default_templates() -> Vec<ModelTemplate> {
        vec![ModelTemplate {
            name: "Ankdown Card".to_string(),
            qfmt: format!("{{{{Question}}}}\n{CARD_MATHJAX_CONTENT}"),
            afmt: format!("{{{{Question}}}}<hr id='answer'>{{{{Answer}}}}\n{CARD_MATHJAX_CONTENT}"),
        }]
    }

    /// Ordinals of the fields the question side of `template` refers to. A
    /// card is only generated for the template if one of them is non-empty.
    pub fn required_fields(&self, template: &ModelTemplate) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| references_field(&template.qfmt, &field.name))
            .map(|(ord, _)| ord)
            .collect()
    }
}

impl Default for CardModel {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL_NAME.to_string(),
            css: DEFAULT_MODEL_CSS.to_string(),
            fields: Self::default_fields(),
            templates: Self::default_templates(),
        }
    }
}

/// Whether a template mentions a field, either as `{{Name}}` or with a filter
/// such as `{{text:Name}}`.
fn references_field(template: &str, name: &str) -> bool {
    template.contains(&format!("{{{{{name}}}}}")) || template.contains(&format!(":{name}}}}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        let model = CardModel::default();
        assert_eq!(model.id(), content_hash("Ankdown Model 2"));
        let names: Vec<&str> = model.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Question", "Answer", "Tags"]);
        assert!(model.templates[0].qfmt.starts_with("{{Question}}\n<script"));
        assert!(model.templates[0].afmt.contains("<hr id='answer'>{{Answer}}"));
    }

    #[test]
    fn test_required_fields() {
        let model = CardModel::default();
        assert_eq!(model.required_fields(&model.templates[0]), vec![0]);
        let reversed = ModelTemplate {
            name: "Reverse".to_string(),
            qfmt: "{{text:Answer}} {{Tags}}".to_string(),
            afmt: "{{Question}}".to_string(),
        };
        assert_eq!(model.required_fields(&reversed), vec![1, 2]);
    }

    #[test]
    fn test_mathjax_delimiters() {
        assert!(CARD_MATHJAX_CONTENT.contains(r"inlineMath: [['\\(', '\\)']]"));
    }
}

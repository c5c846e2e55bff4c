//! Prompt construction for the text and segmentation stages.

use scriptgen_models::{Audience, GenerationParams, ScriptStyle, SourceMaterial};

pub fn audience_guide(audience: Audience) -> &'static str {
    match audience {
        Audience::Kids => "Simple language, basic concepts, and fun examples suitable for children",
        Audience::Teenager => {
            "Clear explanations with relatable examples, avoiding overly complex terms"
        }
        Audience::Adult => "Balanced mix of technical and accessible language",
        Audience::Expert => "Technical language and in-depth scientific concepts",
    }
}

pub fn style_guide(style: ScriptStyle) -> &'static str {
    match style {
        ScriptStyle::Storytelling => {
            "Create a narrative that weaves scientific concepts into an engaging story"
        }
        ScriptStyle::Educational => {
            "Focus on clear, structured explanations with examples and key takeaways"
        }
        ScriptStyle::Casual => "Use conversational tone and relatable analogies",
        ScriptStyle::Humorous => {
            "Include appropriate humor and entertaining elements while maintaining accuracy"
        }
    }
}

fn format_sources(sources: &[SourceMaterial]) -> String {
    sources
        .iter()
        .filter(|s| !s.content.trim().is_empty())
        .map(|s| format!("From \"{}\": {}", s.title.trim(), s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt for the text stage. Asks for `{title, description, script}`.
pub fn script_prompt(params: &GenerationParams) -> String {
    let sources = format_sources(&params.sources);
    let sources_block = if sources.is_empty() {
        String::new()
    } else {
        format!("\nBased on these scientific sources:\n{}\n", sources)
    };

    format!(
        r#"Create a script about "{topic}" with the following requirements:

Audience: {audience}
Style: {style}
Language: {language}
{sources_block}
Instructions:
- Keep the script under {words} words.
- Make it sound natural and smooth for a text-to-speech system.
- Use simple sentence structures that are easy to follow when spoken.
- Avoid special characters or formatting (e.g., bullet points, emojis, etc).
- Focus on clarity and flow.

Return ONLY a single JSON object with this schema:
{{
  "title": "Short title for the script",
  "description": "One sentence summary",
  "script": "The full narration text"
}}"#,
        topic = params.topic.trim(),
        audience = audience_guide(params.audience),
        style = style_guide(params.style),
        language = params.language.display_name(),
        sources_block = sources_block,
        words = params.length.word_budget(),
    )
}

/// Prompt for the segmentation stage.
pub fn split_prompt(script: &str) -> String {
    format!(
        r#"You are an AI assistant that processes short educational scripts and prepares them for image generation using Stable Diffusion.

Your task is:
1. Split the following script into short, meaningful segments (1-2 sentences each).
2. For each segment, create a descriptive and imaginative prompt suitable for generating an illustration with a text-to-image model.
3. Make the prompt visually rich, context-aware, and free of abstract or non-visual words.
4. Use present-tense descriptions and avoid referencing the script or narration directly.

Script:
"""
{script}
"""

Return the result as a JSON array of objects with this format:
[
  {{
    "text": "<segment of script>",
    "imagePrompt": "<visual description for image generation>"
  }}
]
Only return the JSON array."#,
        script = script.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptgen_models::{Language, ScriptLength};

    fn params() -> GenerationParams {
        GenerationParams::new(
            "photosynthesis",
            Audience::Kids,
            ScriptStyle::Educational,
            ScriptLength::VeryShort,
        )
    }

    #[test]
    fn test_script_prompt_carries_guides_and_budget() {
        let prompt = script_prompt(&params());
        assert!(prompt.contains("about \"photosynthesis\""));
        assert!(prompt.contains(audience_guide(Audience::Kids)));
        assert!(prompt.contains(style_guide(ScriptStyle::Educational)));
        assert!(prompt.contains("Language: English"));
        assert!(prompt.contains("under 80 words"));
        assert!(!prompt.contains("scientific sources"));
    }

    #[test]
    fn test_script_prompt_lists_sources_and_language() {
        let params = params()
            .with_language(Language::Vietnamese)
            .with_sources(vec![
                SourceMaterial {
                    title: "Leaves".into(),
                    content: "Chlorophyll absorbs light.".into(),
                },
                SourceMaterial {
                    title: "Empty".into(),
                    content: "  ".into(),
                },
            ]);
        let prompt = script_prompt(&params);
        assert!(prompt.contains("Language: Vietnamese"));
        assert!(prompt.contains("From \"Leaves\": Chlorophyll absorbs light."));
        assert!(!prompt.contains("From \"Empty\""));
    }

    #[test]
    fn test_split_prompt_embeds_script() {
        let prompt = split_prompt("  Plants eat light.  ");
        assert!(prompt.contains("\"\"\"\nPlants eat light.\n\"\"\""));
        assert!(prompt.contains("imagePrompt"));
    }
}

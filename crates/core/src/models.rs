//! Structured records exchanged between pipeline stages.
//!
//! Every record is produced once by its stage and read-only afterwards. Field
//! names follow the JSON the agents are asked to return.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub premise: String,
    pub theme: String,
    /// Short sketch of the cast, not the developed roster.
    pub characters: String,
    pub plot_concepts: String,
    #[serde(default)]
    pub tone_style: String,
    #[serde(default)]
    pub narrative_perspective: String,
    #[serde(default)]
    pub symbolism: String,
    #[serde(default)]
    pub linguistic_constraints: String,
    #[serde(default)]
    pub inspirations: String,
    #[serde(default)]
    pub philosophical_questions: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plot {
    pub description: String,
    pub rising_action: String,
    pub climax: String,
    pub falling_action: String,
    pub resolution: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub role: String,
    pub traits: String,
    pub backstory: String,
    pub motivations: String,
    pub flaws: String,
    pub relationships: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characters {
    pub characters: Vec<Character>,
}

impl Characters {
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.characters.iter().map(|c| c.name.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPlot {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub characters: String,
    #[serde(default)]
    pub connection_to_main_plot: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPlots {
    #[serde(default)]
    pub subplots: Vec<SubPlot>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_title: String,
    pub scene_description: String,
    /// Names of the characters present, as free text.
    pub characters: String,
    pub scene_plot: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_title: String,
    pub chapter_description: String,
    pub chapter_plot: String,
    pub scenes: Vec<Scene>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Act {
    pub act_number: u32,
    pub act_title: String,
    pub act_description: String,
    pub act_plot: String,
    pub chapters: Vec<Chapter>,
}

impl Act {
    pub fn scene_count(&self) -> usize {
        self.chapters.iter().map(|c| c.scenes.len()).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub epigraph: String,
    pub preface: String,
    pub authors_note: String,
    #[serde(default)]
    pub genre: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtisticVision {
    pub genre: String,
    pub tone: String,
    pub style: String,
    pub themes: String,
    pub target_audience: String,
    pub visual_elements: String,
    pub color_palette: String,
    pub mood_board: String,
}

impl ArtisticVision {
    /// Free-text brief handed to every illustration prompt.
    pub fn brief(&self) -> String {
        let fields = [
            ("Genre", &self.genre),
            ("Tone", &self.tone),
            ("Style", &self.style),
            ("Themes", &self.themes),
            ("Target audience", &self.target_audience),
            ("Visual elements", &self.visual_elements),
            ("Color palette", &self.color_palette),
            ("Mood", &self.mood_board),
        ];
        fields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(label, value)| format!("{label}: {}", value.trim()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Serializes a record for embedding into a prompt.
pub fn to_prompt_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idea_accepts_minimal_agent_output() {
        let json = r#"{
            "premise": "A worm speaks",
            "theme": "Connection",
            "characters": "Ada, Caelum",
            "plot_concepts": "First contact underground"
        }"#;
        let idea: Idea = serde_json::from_str(json).unwrap();
        assert_eq!(idea.premise, "A worm speaks");
        assert!(idea.symbolism.is_empty());
    }

    #[test]
    fn act_preserves_chapter_and_scene_order() {
        let json = r#"{
            "act_number": 2,
            "act_title": "Descent",
            "act_description": "d",
            "act_plot": "p",
            "chapters": [
                {"chapter_title": "A", "chapter_description": "", "chapter_plot": "", "scenes": [
                    {"scene_title": "a1", "scene_description": "", "characters": "", "scene_plot": ""},
                    {"scene_title": "a2", "scene_description": "", "characters": "", "scene_plot": ""}
                ]},
                {"chapter_title": "B", "chapter_description": "", "chapter_plot": "", "scenes": []}
            ]
        }"#;
        let act: Act = serde_json::from_str(json).unwrap();
        let titles: Vec<_> = act.chapters.iter().map(|c| c.chapter_title.as_str()).collect();
        assert_eq!(titles, ["A", "B"]);
        assert_eq!(act.chapters[0].scenes[1].scene_title, "a2");
        assert_eq!(act.scene_count(), 2);
    }

    #[test]
    fn brief_skips_empty_fields() {
        let vision = ArtisticVision {
            genre: "Literary".into(),
            color_palette: "umber, ochre".into(),
            ..ArtisticVision::default()
        };
        assert_eq!(vision.brief(), "Genre: Literary; Color palette: umber, ochre");
    }
}

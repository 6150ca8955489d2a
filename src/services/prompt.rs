use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::services::variety::CompositionDescriptor;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Things every page image must avoid, comma-joined.
pub const NEGATIVE_CONSTRAINTS: &str = concat!(
    // anatomy
    "extra limbs, extra arms, extra legs, extra fingers, extra hands, extra feet, ",
    "missing limbs, missing arms, missing legs, missing fingers, missing hands, ",
    "deformed hands, deformed fingers, mutated hands, poorly drawn hands, fused fingers, ",
    "deformed anatomy, bad anatomy, wrong anatomy, distorted body, twisted limbs, ",
    "broken limbs, disconnected limbs, floating limbs, duplicate limbs, ",
    "malformed body, disfigured, mutation, mutilated, gross proportions, ",
    "long neck, elongated body, disproportionate, asymmetric body, ",
    // face
    "deformed face, ugly face, bad face, poorly drawn face, cloned face, ",
    "extra eyes, missing eyes, deformed eyes, cross-eyed, fused eyes, ",
    "extra heads, two heads, multiple heads, floating head, ",
    // several characters merging into one
    "merged characters, fused characters, characters melting together, blended bodies, ",
    "conjoined characters, overlapping bodies, characters sharing limbs, merged faces, ",
    "characters connected, fused bodies, body parts merging, characters touching inappropriately, ",
    "unclear character boundaries, ambiguous character separation, morphed characters, ",
    "characters blending into each other, shared anatomy between characters, hybrid characters, ",
    "characters with mixed features, indistinct character separation, confused character identity, ",
    // realism
    "photorealistic, realistic photo, photograph, camera shot, 3d render, ",
    "close-up portrait, headshot, mugshot, passport photo, selfie, ",
    "character looking at camera, character staring at viewer, direct eye contact, ",
    // composition
    "cropped image, zoomed in face, tight framing, no environment, ",
    "plain background, white background, studio lighting, professional photography, ",
    "realistic skin texture, photographic lighting, depth of field blur, ",
    "bokeh effect, lens flare, camera artifacts, digital noise, ",
    // quality
    "low quality, worst quality, blurry, jpeg artifacts, watermark, ",
    "signature, text, username, error, lowres, bad quality, ",
    "poorly drawn, amateur, sketch, unfinished, messy"
);

/// Shorter list used for the cover, which additionally bans any lettering.
pub const COVER_NEGATIVE_CONSTRAINTS: &str = concat!(
    "extra limbs, extra arms, extra legs, extra fingers, deformed hands, bad anatomy, ",
    "missing limbs, poorly drawn hands, mutated hands, fused fingers, distorted body, ",
    "photorealistic, realistic photo, photograph, plain background, boring composition, ",
    "generic stock image, low quality, worst quality, blurry, deformed, disfigured, ",
    "mutation, gross proportions, malformed, ugly, bad quality, text, words, title"
);

const QUALITY_CLAUSE: &str = "CRITICAL QUALITY REQUIREMENTS: correct anatomy, proper proportions, \
accurate limb count (2 arms, 2 legs), well-drawn hands with correct finger count, well-drawn feet, \
symmetrical body structure, no deformities, professional character design.";

const MULTI_CHARACTER_CLAUSE: &str = "MULTI-CHARACTER SCENE REQUIREMENTS: Each character must be \
CLEARLY SEPARATED with visible space between them. Each character has DISTINCT and COMPLETE anatomy \
(their own 2 arms, 2 legs, 1 head, separate bodies). Characters positioned with CLEAR BOUNDARIES - \
no overlapping bodies, no shared limbs, no merged anatomy. Each character maintains INDIVIDUAL \
IDENTITY with distinct features, clothing, and colors. Spatial separation between characters (at \
least arm's length apart). Characters can interact but bodies remain COMPLETELY SEPARATE. Clear \
visual distinction between each character. NO body parts merging or blending between characters.";

const SCENE_CLAUSE: &str = "Environmental storytelling, character positioned naturally in scene, \
dynamic camera work, detailed background environment, atmospheric perspective.";

const STORYBOOK_CLAUSE: &str = "Professional children's book illustration following storybook \
composition rules, focal point placement for text space (top or sides), consistent character \
design, atmospheric lighting matching mood, rich environmental details, masterpiece quality, best \
quality, high resolution, safe for children, no text or words in image.";

const COVER_COMPOSITION: &str = "BOOK COVER COMPOSITION, WIDE ESTABLISHING SHOT showing the main \
story setting and atmosphere based on the story description, main character visible in the scene \
doing something related to the story, inviting composition perfect for a children's book cover, \
balanced layout, environmental elements that reflect the story theme and plot";

const COVER_QUALITY_CLAUSE: &str = "CRITICAL QUALITY: correct anatomy, proper proportions, accurate \
limb count, well-drawn hands and feet, symmetrical body, professional character design. Professional \
children's book cover illustration that captures the essence of the story, eye-catching design, \
inviting and appealing to children, masterpiece quality, best quality, high resolution cover art, \
marketable book cover, detailed background that matches story theme and setting world, safe for \
children, NO TEXT, NO TITLE, NO WORDS on the image - just the illustration.";

/// Words that suggest more than one character is in the scene.
const MULTI_CHARACTER_WORDS: &[&str] = &[
    "and", "with", "two", "three", "multiple", "both", "together", "group", "friends", "family",
    "characters",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtStyle {
    Cartoon,
    Watercolor,
    DigitalPainting,
    Sketch,
    SemiRealistic,
    Anime,
}

impl ArtStyle {
    pub const ALL: [ArtStyle; 6] = [
        ArtStyle::Cartoon,
        ArtStyle::Watercolor,
        ArtStyle::DigitalPainting,
        ArtStyle::Sketch,
        ArtStyle::SemiRealistic,
        ArtStyle::Anime,
    ];

    /// Parses a user supplied style name. Unknown names become `Cartoon`.
    pub fn parse(name: &str) -> Self {
        Self::try_parse(name).unwrap_or_else(|| {
            warn!("Unknown art style '{}', falling back to cartoon", name);
            ArtStyle::Cartoon
        })
    }

    fn try_parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "cartoon" => Some(ArtStyle::Cartoon),
            "watercolor" | "watercolour" => Some(ArtStyle::Watercolor),
            "digital-painting" | "digital" => Some(ArtStyle::DigitalPainting),
            "sketch" => Some(ArtStyle::Sketch),
            "semi-realistic" | "realistic" => Some(ArtStyle::SemiRealistic),
            "anime" => Some(ArtStyle::Anime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtStyle::Cartoon => "cartoon",
            ArtStyle::Watercolor => "watercolor",
            ArtStyle::DigitalPainting => "digital-painting",
            ArtStyle::Sketch => "sketch",
            ArtStyle::SemiRealistic => "semi-realistic",
            ArtStyle::Anime => "anime",
        }
    }

    fn default_page_template(&self) -> &'static str {
        match self {
            ArtStyle::Cartoon => "CARTOON ILLUSTRATION STYLE, CORRECT ANATOMY, proper proportions, well-drawn hands and feet, accurate limb count, flat colors, bold outlines, simple shapes, cute characters, Disney Pixar style, animated movie look, vector art, detailed cartoon environments, NO REALISM, child-friendly cartoon, environmental storytelling, professional character design",
            ArtStyle::Watercolor => "WATERCOLOR PAINTING, CORRECT ANATOMY, proper proportions, well-drawn hands, accurate body structure, soft edges, paint bleeding, paper texture visible, artistic brushstrokes, pastel colors, traditional watercolor medium, NOT DIGITAL, hand-painted look, children's book watercolor, atmospheric environments, professional illustration quality",
            ArtStyle::DigitalPainting => "DIGITAL PAINTING, CORRECT ANATOMY, proper proportions, well-drawn limbs, accurate character design, clean vector lines, flat color blocks, modern graphic design, Adobe Illustrator style, smooth gradients, polished digital art, children's book digital illustration, detailed digital environments, professional quality",
            ArtStyle::Sketch => "PENCIL SKETCH DRAWING, CORRECT ANATOMY, proper proportions, well-drawn hands and feet, hand-drawn lines, graphite texture, sketch marks visible, rough pencil strokes, black and white or light shading, NOT REALISTIC, artistic sketch style, children's book sketch illustration, environmental sketching, professional sketch quality",
            ArtStyle::SemiRealistic => "SEMI-REALISTIC PAINTING, CORRECT ANATOMY, proper proportions, well-drawn body parts, painterly style, soft brush strokes, storybook illustration quality, warm colors, NOT PHOTOGRAPHIC, artistic painting, children's book painted illustration, painted environments, professional painting quality",
            ArtStyle::Anime => "ANIME MANGA STYLE, CORRECT ANATOMY, proper proportions, well-drawn hands, big expressive eyes, Japanese animation style, cel-shaded, bold outlines, vibrant anime colors, Studio Ghibli inspired, child-appropriate anime illustration, detailed anime backgrounds, professional anime quality",
        }
    }

    fn default_cover_template(&self) -> &'static str {
        match self {
            ArtStyle::Cartoon => "CARTOON BOOK COVER ILLUSTRATION, CORRECT ANATOMY, proper proportions, well-drawn hands and feet, professional children's book cover art, flat colors, bold outlines, cute characters, Disney Pixar poster style, eye-catching composition, vector art, title-ready layout, masterpiece quality",
            ArtStyle::Watercolor => "WATERCOLOR BOOK COVER ART, CORRECT ANATOMY, proper proportions, well-drawn limbs, soft edges, artistic brushstrokes, pastel colors, traditional watercolor medium, hand-painted children's book cover, beautiful atmospheric art, professional quality",
            ArtStyle::DigitalPainting => "DIGITAL BOOK COVER ART, CORRECT ANATOMY, proper proportions, accurate character design, clean lines, modern graphic design, polished digital illustration, professional children's book cover, vibrant and inviting, high quality",
            ArtStyle::Sketch => "PENCIL SKETCH BOOK COVER, CORRECT ANATOMY, proper proportions, well-drawn hands, hand-drawn artistic cover, sketch illustration style, children's book cover art, charming sketch aesthetic, professional quality",
            ArtStyle::SemiRealistic => "SEMI-REALISTIC BOOK COVER PAINTING, CORRECT ANATOMY, proper proportions, well-drawn body parts, painterly cover art, storybook illustration quality, professional children's book cover, warm inviting colors, masterpiece quality",
            ArtStyle::Anime => "ANIME MANGA BOOK COVER, CORRECT ANATOMY, proper proportions, well-drawn hands, big expressive eyes, Japanese animation poster style, vibrant anime colors, Studio Ghibli inspired cover art, eye-catching anime illustration, professional quality",
        }
    }
}

impl fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleTemplates {
    pub page: String,
    pub cover: String,
}

/// Style templates available to the prompt builder.
#[derive(Debug, Clone, Default)]
pub struct StyleCatalog {
    templates: HashMap<ArtStyle, StyleTemplates>,
}

impl StyleCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let templates = ArtStyle::ALL
            .iter()
            .map(|style| {
                (
                    *style,
                    StyleTemplates {
                        page: style.default_page_template().to_string(),
                        cover: style.default_cover_template().to_string(),
                    },
                )
            })
            .collect();
        Self { templates }
    }

    /// Built-in templates with `config.styles` page overrides applied.
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::builtin();
        for (name, template) in &config.styles {
            match ArtStyle::try_parse(name) {
                Some(style) => catalog.set_page_template(style, template.clone()),
                None => warn!("Ignoring template override for unknown style '{}'", name),
            }
        }
        catalog
    }

    pub fn insert(&mut self, style: ArtStyle, templates: StyleTemplates) {
        self.templates.insert(style, templates);
    }

    fn set_page_template(&mut self, style: ArtStyle, page: String) {
        if let Some(entry) = self.templates.get_mut(&style) {
            entry.page = page;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn ensure_usable(&self) -> Result<(), PipelineError> {
        if self.is_empty() {
            return Err(PipelineError::config("style catalog is empty"));
        }
        Ok(())
    }

    /// Templates for `style`, falling back to cartoon and then to any entry.
    pub fn get(&self, style: ArtStyle) -> Result<&StyleTemplates, PipelineError> {
        self.templates
            .get(&style)
            .or_else(|| self.templates.get(&ArtStyle::Cartoon))
            .or_else(|| {
                ArtStyle::ALL
                    .iter()
                    .find_map(|candidate| self.templates.get(candidate))
            })
            .ok_or_else(|| PipelineError::config("style catalog is empty"))
    }
}

/// Inputs for one page prompt.
#[derive(Debug, Clone, Copy)]
pub struct PagePrompt<'a> {
    pub description: &'a str,
    pub style: ArtStyle,
    pub character: Option<&'a str>,
    pub composition: Option<&'a CompositionDescriptor>,
    pub color_scheme: Option<&'a str>,
    pub narrative_purpose: Option<&'a str>,
    pub mood: Option<&'a str>,
}

/// Inputs for the cover prompt.
#[derive(Debug, Clone, Copy)]
pub struct CoverPrompt<'a> {
    pub description: &'a str,
    pub style: ArtStyle,
    pub character: Option<&'a str>,
    pub color_scheme: Option<&'a str>,
}

pub fn mood_color_tones(mood: Option<&str>) -> &'static str {
    let Some(mood) = mood else {
        return "balanced natural colors";
    };
    let mood = mood.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| mood.contains(w));
    if has(&["happy", "joyful"]) {
        "warm tones, bright yellows and oranges"
    } else if has(&["sad", "melancholy"]) {
        "cool tones, blues and grays"
    } else if has(&["exciting", "action"]) {
        "vibrant saturated colors, high energy"
    } else if has(&["calm", "peaceful"]) {
        "soft pastels, gentle colors"
    } else if has(&["dramatic", "tense"]) {
        "high contrast, deep shadows"
    } else if has(&["mysterious"]) {
        "dark purples and blues, atmospheric"
    } else {
        "balanced natural colors"
    }
}

pub fn narrative_purpose_phrase(purpose: &str) -> Option<&'static str> {
    match purpose.trim().to_lowercase().as_str() {
        "introduction" => Some("welcoming and inviting atmosphere"),
        "problem" => Some("building tension, visual conflict"),
        "action" => Some("dynamic movement, energy"),
        "climax" => Some("dramatic peak moment, intense"),
        "resolution" => Some("relief and closure, peaceful"),
        _ => None,
    }
}

pub fn environment_suggestion(description: &str) -> &'static str {
    let desc = description.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| desc.contains(w));
    if has(&["forest", "woods", "tree"]) {
        "dense forest environment with varied tree species, forest floor details, natural lighting through canopy"
    } else if has(&["ocean", "sea", "beach"]) {
        "coastal environment with waves, sand, seashells, marine elements, water reflections"
    } else if has(&["mountain", "hill", "cliff"]) {
        "mountainous terrain with rocky outcrops, distant peaks, varied elevation, dramatic vistas"
    } else if has(&["home", "house", "room", "indoor"]) {
        "detailed interior with furniture, decorations, windows, cozy lived-in details"
    } else if has(&["city", "town", "street"]) {
        "urban environment with buildings, architectural details, street elements, city atmosphere"
    } else if has(&["garden", "flower", "plant"]) {
        "lush garden setting with diverse plants, flowers, natural growth, organic shapes"
    } else if has(&["cave", "underground"]) {
        "cave or underground environment with rock formations, shadows, mysterious depths"
    } else if has(&["sky", "cloud", "flying"]) {
        "expansive sky environment with clouds, atmospheric perspective, aerial view"
    } else {
        "richly detailed environment with foreground, middle ground, and background elements, atmospheric depth"
    }
}

/// Whole-word check for words hinting at several characters.
pub fn mentions_multiple_characters(description: &str) -> bool {
    description
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .any(|word| {
            MULTI_CHARACTER_WORDS
                .iter()
                .any(|keyword| word.eq_ignore_ascii_case(keyword))
        })
}

/// Appends the story colour scheme unless the description already talks about colour.
pub fn fold_color_scheme(description: &str, color_scheme: Option<&str>) -> String {
    match color_scheme.map(str::trim) {
        Some(scheme) if !scheme.is_empty() && !description.to_lowercase().contains("color") => {
            format!("{}. Overall story color palette: {}", description, scheme)
        }
        _ => description.to_string(),
    }
}

pub struct PromptBuilder {
    catalog: StyleCatalog,
}

impl PromptBuilder {
    pub fn new(catalog: StyleCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    pub fn build(&self, input: &PagePrompt<'_>) -> Result<String, PipelineError> {
        let style = &self.catalog.get(input.style)?.page;
        let mut prompt = format!("{}, ", style);

        if let Some(character) = input.character.map(str::trim).filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("Character: {}. ", character));
        }
        if let Some(composition) = input.composition {
            prompt.push_str(&format!("{}. ", composition.text()));
        }

        let scene = fold_color_scheme(input.description, input.color_scheme);
        prompt.push_str(&format!(
            "Scene: {}. Setting details: {}. ",
            scene,
            environment_suggestion(input.description)
        ));

        if let Some(phrase) = input.narrative_purpose.and_then(narrative_purpose_phrase) {
            prompt.push_str(&format!("{}. ", phrase));
        }
        prompt.push_str(&format!("Color palette: {}. ", mood_color_tones(input.mood)));

        prompt.push_str(QUALITY_CLAUSE);
        if mentions_multiple_characters(input.description) {
            prompt.push(' ');
            prompt.push_str(MULTI_CHARACTER_CLAUSE);
        }
        prompt.push_str(&format!(
            " {} IMPORTANT: {}. {} NEGATIVE PROMPTS TO AVOID: {}",
            SCENE_CLAUSE, style, STORYBOOK_CLAUSE, NEGATIVE_CONSTRAINTS
        ));
        Ok(prompt)
    }

    pub fn build_cover(&self, input: &CoverPrompt<'_>) -> Result<String, PipelineError> {
        let style = &self.catalog.get(input.style)?.cover;
        let mut prompt = format!("{}, Story is about: {}. ", style, input.description);
        if let Some(character) = input.character.map(str::trim).filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("Main character: {}. ", character));
        }
        if let Some(scheme) = input.color_scheme.map(str::trim).filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("Color palette: {}. ", scheme));
        }
        prompt.push_str(&format!(
            "{}. COVER MUST VISUALLY REPRESENT THE STORY: {}. The illustration should clearly show \
             elements from the story description. {} NEGATIVE PROMPTS TO AVOID: {}",
            COVER_COMPOSITION, input.description, COVER_QUALITY_CLAUSE, COVER_NEGATIVE_CONSTRAINTS
        ));
        Ok(prompt)
    }
}

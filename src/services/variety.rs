//! Per-page composition variety.
//!
//! Picks a camera angle, framing position, environment, lighting, atmosphere
//! and character action for each page, never repeating the previous page's
//! pick on any axis. The memory of previous picks lives in a
//! [`CompositionState`] owned by one engine, and one engine belongs to one
//! story run.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;

pub const CAMERA_ANGLES: &[&str] = &[
    "WIDE ESTABLISHING SHOT",
    "MEDIUM SHOT",
    "MEDIUM CLOSE-UP",
    "OVER-THE-SHOULDER perspective",
    "LOW ANGLE looking up at character",
    "HIGH ANGLE bird's eye view",
    "DUTCH ANGLE (tilted camera)",
    "SIDE PROFILE view",
    "3/4 ANGLE view",
    "BACK VIEW showing character from behind",
    "DIAGONAL COMPOSITION",
    "RULE OF THIRDS composition",
];

pub const CHARACTER_POSITIONS: &[&str] = &[
    "character positioned in lower third of frame",
    "character in upper left corner",
    "character in upper right corner",
    "character centered in frame",
    "character off-center to the left",
    "character off-center to the right",
    "character small in the distance",
    "character large in foreground",
    "character in middle ground",
    "character positioned according to rule of thirds",
];

pub const ENVIRONMENTS: &[&str] = &[
    "lush forest background with dappled sunlight",
    "open meadow with wildflowers",
    "mountainous landscape with distant peaks",
    "cozy indoor room with warm lighting",
    "magical garden with fantastical elements",
    "beach or waterside setting",
    "urban setting with buildings",
    "countryside with rolling hills",
    "nighttime scene with stars or moon",
    "rainy or stormy atmosphere",
    "snowy winter wonderland",
    "autumn scene with colorful leaves",
    "spring blossoms and fresh greenery",
    "desert or arid landscape",
    "mystical foggy environment",
];

pub const LIGHTING_CONDITIONS: &[&str] = &[
    "GOLDEN HOUR lighting, warm sunset glow",
    "BRIGHT MIDDAY sun, strong shadows",
    "SOFT OVERCAST lighting, even illumination",
    "DRAMATIC side lighting, strong contrast",
    "BACKLIT silhouette effect",
    "MOONLIGHT, cool blue tones",
    "CANDLELIGHT or warm interior glow",
    "DAPPLED LIGHT through trees",
    "STORMY dark clouds with rim lighting",
    "MAGICAL glowing light sources",
    "SUNRISE colors, pink and orange sky",
    "TWILIGHT, purple and blue hues",
];

pub const ATMOSPHERIC_EFFECTS: &[&str] = &[
    "light rays piercing through atmosphere",
    "gentle mist or fog",
    "dust particles in the air",
    "falling leaves or petals",
    "rain or water droplets",
    "snowflakes falling",
    "sparkles or magical particles",
    "wind effects on environment",
    "clouds in background",
    "clear crisp air",
];

pub const CHARACTER_ACTIONS: &[&str] = &[
    "character walking or moving forward",
    "character running or in motion",
    "character standing and observing",
    "character sitting or resting",
    "character reaching or pointing",
    "character looking up at something",
    "character bending down examining something",
    "character with arms outstretched",
    "character in contemplative pose",
    "character jumping or leaping",
    "character dancing or twirling",
    "character climbing or ascending",
];

pub const ESTABLISHING_ANGLE: &str = "WIDE ESTABLISHING SHOT";
pub const ESTABLISHING_POSITION: &str = "character in environment context, full scene visible";
pub const RESOLUTION_ANGLE: &str = "RESOLUTION SHOT";
pub const RESOLUTION_POSITION: &str = "character in peaceful environment";

/// Last pick per axis. Cleared by [`CompositionVarietyEngine::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionState {
    pub last_angle: Option<&'static str>,
    pub last_position: Option<&'static str>,
    pub last_environment: Option<&'static str>,
    pub last_lighting: Option<&'static str>,
    pub last_atmosphere: Option<&'static str>,
    pub last_action: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Opening,
    Interior,
    Closing,
}

impl PageRole {
    pub fn of(page_number: usize, total_pages: usize) -> Self {
        if page_number <= 1 {
            PageRole::Opening
        } else if page_number >= total_pages {
            PageRole::Closing
        } else {
            PageRole::Interior
        }
    }
}

/// Composition choices for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionDescriptor {
    pub role: PageRole,
    pub angle: &'static str,
    pub position: &'static str,
    pub environment: &'static str,
    pub lighting: Option<&'static str>,
    pub atmosphere: Option<&'static str>,
    pub action: Option<&'static str>,
    pub mood_modifier: Option<&'static str>,
    pub pacing_note: Option<&'static str>,
}

impl CompositionDescriptor {
    /// Prompt fragment for this composition.
    pub fn text(&self) -> String {
        match self.role {
            PageRole::Opening => format!(
                "{}, {}, {}, {}, detailed background setting, environmental storytelling",
                self.angle,
                self.position,
                self.environment,
                self.lighting.unwrap_or_default(),
            ),
            PageRole::Closing => format!(
                "{}, {}, {}, {}, satisfying environmental closure, warm and peaceful atmosphere",
                self.angle, RESOLUTION_POSITION, self.environment, self.position,
            ),
            PageRole::Interior => {
                let mut parts = vec![self.angle, self.position];
                parts.extend(self.action);
                parts.push(self.environment);
                parts.extend(self.lighting);
                parts.extend(self.atmosphere);
                parts.extend(self.mood_modifier);
                parts.extend(self.pacing_note);
                parts.push("character NOT looking at camera");
                parts.push("environmental storytelling");
                parts.push("professional composition");
                parts.join(", ")
            }
        }
    }
}

/// Fixed modifier for a free-form mood, if it names one we know.
pub fn mood_modifier(mood: &str) -> Option<&'static str> {
    let mood = mood.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| mood.contains(w));
    if has(&["action", "exciting"]) {
        Some("DYNAMIC energy, motion blur effect, fast-paced action")
    } else if has(&["sad", "emotional"]) {
        Some("EMOTIONAL depth, intimate framing, expressive character")
    } else if has(&["dramatic", "tense"]) {
        Some("DRAMATIC tension, strong contrast, intense atmosphere")
    } else if has(&["happy", "joyful"]) {
        Some("CHEERFUL vibrancy, bright colors, uplifting mood")
    } else if has(&["mysterious", "suspense"]) {
        Some("MYSTERIOUS atmosphere, shadows and intrigue, suspenseful")
    } else {
        None
    }
}

/// Pacing note from narrative position (`page_number / total_pages`).
pub fn pacing_note(page_number: usize, total_pages: usize) -> Option<&'static str> {
    if total_pages == 0 {
        return None;
    }
    let position = page_number as f64 / total_pages as f64;
    if position < 0.3 {
        Some("story introduction, setting the scene")
    } else if position < 0.5 {
        Some("rising action, building momentum")
    } else if position < 0.7 {
        Some("story development, character depth")
    } else if position < 0.9 {
        Some("approaching climax, heightened intensity")
    } else {
        None
    }
}

pub struct CompositionVarietyEngine {
    state: CompositionState,
    rng: StdRng,
}

impl Default for CompositionVarietyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionVarietyEngine {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: CompositionState::default(),
            rng,
        }
    }

    pub fn state(&self) -> &CompositionState {
        &self.state
    }

    /// Forget all previous picks. Call once per story, before page 1.
    pub fn reset(&mut self) {
        self.state = CompositionState::default();
    }

    /// Uniform pick from `options`, excluding `last` unless it is the only option.
    fn pick(rng: &mut StdRng, options: &[&'static str], last: Option<&'static str>) -> &'static str {
        if options.len() <= 1 {
            return options.first().copied().unwrap_or_default();
        }
        options
            .iter()
            .copied()
            .filter(|o| Some(*o) != last)
            .choose(rng)
            .unwrap_or_default()
    }

    pub fn next(
        &mut self,
        page_number: usize,
        total_pages: usize,
        mood: Option<&str>,
    ) -> CompositionDescriptor {
        let role = PageRole::of(page_number, total_pages);
        let descriptor = match role {
            PageRole::Opening => {
                let environment = Self::pick(&mut self.rng, ENVIRONMENTS, None);
                let lighting = Self::pick(&mut self.rng, LIGHTING_CONDITIONS, None);
                self.state.last_environment = Some(environment);
                self.state.last_lighting = Some(lighting);
                CompositionDescriptor {
                    role,
                    angle: ESTABLISHING_ANGLE,
                    position: ESTABLISHING_POSITION,
                    environment,
                    lighting: Some(lighting),
                    atmosphere: None,
                    action: None,
                    mood_modifier: None,
                    pacing_note: None,
                }
            }
            PageRole::Closing => {
                let environment =
                    Self::pick(&mut self.rng, ENVIRONMENTS, self.state.last_environment);
                let position = Self::pick(&mut self.rng, CHARACTER_POSITIONS, None);
                self.state.last_environment = Some(environment);
                self.state.last_position = Some(position);
                CompositionDescriptor {
                    role,
                    angle: RESOLUTION_ANGLE,
                    position,
                    environment,
                    lighting: None,
                    atmosphere: None,
                    action: None,
                    mood_modifier: None,
                    pacing_note: None,
                }
            }
            PageRole::Interior => {
                let state = &mut self.state;
                let rng = &mut self.rng;
                let angle = Self::pick(rng, CAMERA_ANGLES, state.last_angle);
                let position = Self::pick(rng, CHARACTER_POSITIONS, state.last_position);
                let environment = Self::pick(rng, ENVIRONMENTS, state.last_environment);
                let lighting = Self::pick(rng, LIGHTING_CONDITIONS, state.last_lighting);
                let atmosphere = Self::pick(rng, ATMOSPHERIC_EFFECTS, state.last_atmosphere);
                let action = Self::pick(rng, CHARACTER_ACTIONS, state.last_action);

                *state = CompositionState {
                    last_angle: Some(angle),
                    last_position: Some(position),
                    last_environment: Some(environment),
                    last_lighting: Some(lighting),
                    last_atmosphere: Some(atmosphere),
                    last_action: Some(action),
                };

                CompositionDescriptor {
                    role,
                    angle,
                    position,
                    environment,
                    lighting: Some(lighting),
                    atmosphere: Some(atmosphere),
                    action: Some(action),
                    mood_modifier: mood.and_then(mood_modifier),
                    pacing_note: pacing_note(page_number, total_pages),
                }
            }
        };
        debug!(
            "Page {}/{} composition: {} / {}",
            page_number, total_pages, descriptor.angle, descriptor.environment
        );
        descriptor
    }
}

//! Workload Detection
//!
//! Classifies a prompt into a media type and produces routing hints. The
//! rules run in a fixed priority order: an explicit annotation always wins,
//! then realtime, audio, code, image, and finally plain text. Each media
//! type carries a preset profile (preferred model, latency/power preference,
//! size and throughput floors) that the router consumes.

use serde::{Deserialize, Serialize};

use super::annotations::{Annotations, MediaType};

// ============================================================================
// Keyword Tables
// ============================================================================

const REALTIME_KEYWORDS: &[&str] = &[
    "realtime",
    "real-time",
    "real time",
    "live",
    "streaming",
    "interactive chat",
    "voice chat",
    "instant",
    "immediate",
    "continuous",
    "ongoing",
    "transcribe",
    "transcription",
    "dictate",
    "dictation",
];

const AUDIO_KEYWORDS: &[&str] = &[
    "audio",
    "sound",
    "voice",
    "speech",
    "listen",
    "hear",
    "spoken",
    "podcast",
    "recording",
    "tts",
    "text to speech",
    "text-to-speech",
    "stt",
    "speech to text",
    "speech-to-text",
    "transcribe",
    "transcription",
];

const CODE_MODEL_KEYWORDS: &[&str] = &["code", "starcoder", "codellama"];

const CODE_KEYWORDS: &[&str] = &[
    "code",
    "program",
    "function",
    "class",
    "implement",
    "refactor",
    "debug",
    "python",
    "javascript",
    "java",
    "go",
    "rust",
    "c++",
    "algorithm",
    "data structure",
    "api",
    "endpoint",
    "server",
    "bug",
    "error",
    "exception",
    "test",
    "unit test",
    "sql",
    "query",
    "database",
    "html",
    "css",
    "react",
    "vue",
];

const IMAGE_KEYWORDS: &[&str] = &[
    "image",
    "picture",
    "photo",
    "visual",
    "draw",
    "generate image",
    "create image",
    "analyze image",
    "describe image",
    "vision",
    "see",
    "look at",
    "screenshot",
    "diagram",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

// ============================================================================
// Workload Profile
// ============================================================================

/// Preset routing profile for a media type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// The media type this profile belongs to
    pub media_type: MediaType,
    /// Model to prefer when the request names none
    pub preferred_model: String,
    /// Bias selection toward low latency
    pub prefer_low_latency: bool,
    /// Bias selection toward low power
    pub prefer_low_power: bool,
    /// Largest model worth loading for this workload, in GB
    pub max_model_size_gb: f64,
    /// Minimum acceptable throughput
    pub min_tokens_per_sec: f64,
}

impl WorkloadProfile {
    /// The preset profile for `media_type`
    #[must_use]
    pub fn preset(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Realtime => Self {
                media_type,
                preferred_model: "qwen2.5:0.5b".to_string(),
                prefer_low_latency: true,
                prefer_low_power: false,
                max_model_size_gb: 2.0,
                min_tokens_per_sec: 30.0,
            },
            MediaType::Audio => Self {
                media_type,
                preferred_model: "whisper-base".to_string(),
                prefer_low_latency: true,
                prefer_low_power: true,
                max_model_size_gb: 4.0,
                min_tokens_per_sec: 15.0,
            },
            MediaType::Code => Self {
                media_type,
                preferred_model: "qwen2.5-coder:7b".to_string(),
                prefer_low_latency: false,
                prefer_low_power: false,
                max_model_size_gb: 16.0,
                min_tokens_per_sec: 10.0,
            },
            MediaType::Image => Self {
                media_type,
                preferred_model: "llava:7b".to_string(),
                prefer_low_latency: false,
                prefer_low_power: false,
                max_model_size_gb: 12.0,
                min_tokens_per_sec: 5.0,
            },
            MediaType::Video => Self {
                media_type,
                preferred_model: "llava:13b".to_string(),
                prefer_low_latency: false,
                prefer_low_power: false,
                max_model_size_gb: 24.0,
                min_tokens_per_sec: 5.0,
            },
            MediaType::Text | MediaType::Auto => Self {
                media_type: MediaType::Text,
                preferred_model: "llama3:7b".to_string(),
                prefer_low_latency: false,
                prefer_low_power: true,
                max_model_size_gb: 8.0,
                min_tokens_per_sec: 8.0,
            },
        }
    }
}

// ============================================================================
// Routing Hints
// ============================================================================

/// Detector output: the profile plus how we got there
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingHints {
    /// Detected or declared media type
    pub media_type: MediaType,
    /// Profile for that media type, with annotation overrides applied
    pub profile: WorkloadProfile,
    /// Ordered explanation of the decision and any overrides
    pub reasoning: Vec<String>,
}

// ============================================================================
// Workload Detector
// ============================================================================

/// Prompt → media type classifier
#[derive(Clone, Debug, Default)]
pub struct WorkloadDetector;

impl WorkloadDetector {
    /// Create a detector
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Detect the media type for a prompt
    ///
    /// A non-auto annotation short-circuits detection; otherwise the rules
    /// apply in priority order: realtime, audio, code, image, text.
    #[must_use]
    pub fn detect_media_type(
        &self,
        prompt: &str,
        model: &str,
        annotations: &Annotations,
    ) -> MediaType {
        if annotations.media_type != MediaType::Auto {
            return annotations.media_type;
        }

        let prompt_lower = prompt.to_lowercase();
        let model_lower = model.to_lowercase();

        let audio_prompt = contains_any(&prompt_lower, AUDIO_KEYWORDS);

        if annotations.latency_critical
            && (contains_any(&prompt_lower, REALTIME_KEYWORDS) || audio_prompt)
        {
            return MediaType::Realtime;
        }

        if audio_prompt {
            return MediaType::Audio;
        }

        if contains_any(&model_lower, CODE_MODEL_KEYWORDS)
            || contains_any(&prompt_lower, CODE_KEYWORDS)
        {
            return MediaType::Code;
        }

        if contains_any(&prompt_lower, IMAGE_KEYWORDS) {
            return MediaType::Image;
        }

        MediaType::Text
    }

    /// Produce full routing hints, applying annotation-driven overrides of
    /// the preset latency/power preferences and documenting each step
    #[must_use]
    pub fn hints(&self, prompt: &str, model: &str, annotations: &Annotations) -> RoutingHints {
        let mut reasoning = Vec::new();

        let media_type = self.detect_media_type(prompt, model, annotations);
        if annotations.media_type != MediaType::Auto {
            reasoning.push(format!("media type {media_type} declared by annotation"));
        } else {
            reasoning.push(format!("media type {media_type} detected from prompt"));
        }

        let mut profile = WorkloadProfile::preset(media_type);

        if annotations.latency_critical && !profile.prefer_low_latency {
            profile.prefer_low_latency = true;
            reasoning.push("latency preference overridden by latency_critical annotation".to_string());
        }
        if annotations.prefer_power_efficiency && !profile.prefer_low_power {
            profile.prefer_low_power = true;
            reasoning.push("power preference overridden by prefer_power_efficiency annotation".to_string());
        }

        RoutingHints {
            media_type,
            profile,
            reasoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(prompt: &str, model: &str) -> MediaType {
        WorkloadDetector::new().detect_media_type(prompt, model, &Annotations::default())
    }

    #[test]
    fn test_annotation_wins() {
        let ann = Annotations::default().with_media_type(MediaType::Video);
        let detector = WorkloadDetector::new();
        assert_eq!(
            detector.detect_media_type("write some python code", "", &ann),
            MediaType::Video
        );
    }

    #[test]
    fn test_realtime_requires_latency_critical() {
        let detector = WorkloadDetector::new();

        // Realtime keyword without the annotation falls through the rules
        assert_eq!(detect("live transcription please", ""), MediaType::Audio);

        let ann = Annotations::default().latency_critical();
        assert_eq!(
            detector.detect_media_type("live captioning of this call", "", &ann),
            MediaType::Realtime
        );

        // Latency-critical plus an audio prompt is realtime too
        assert_eq!(
            detector.detect_media_type("turn this voice recording into text", "", &ann),
            MediaType::Realtime
        );
    }

    #[test]
    fn test_audio_detection() {
        assert_eq!(detect("summarize this podcast episode", ""), MediaType::Audio);
        assert_eq!(detect("run text-to-speech on this", ""), MediaType::Audio);
    }

    #[test]
    fn test_code_detection_by_prompt_and_model() {
        assert_eq!(detect("refactor this function", ""), MediaType::Code);
        assert_eq!(detect("fix the sql query", ""), MediaType::Code);
        assert_eq!(detect("hello there", "codellama:13b"), MediaType::Code);
        assert_eq!(detect("hello there", "starcoder2:3b"), MediaType::Code);
    }

    #[test]
    fn test_audio_beats_code() {
        // "speech" appears before any code keyword is considered
        assert_eq!(
            detect("write speech recognition code", ""),
            MediaType::Audio
        );
    }

    #[test]
    fn test_image_detection() {
        assert_eq!(detect("describe this screenshot for me", ""), MediaType::Image);
        assert_eq!(detect("make me a diagram of the flow", ""), MediaType::Image);
    }

    #[test]
    fn test_default_text() {
        assert_eq!(detect("tell me about the weather", ""), MediaType::Text);
    }

    #[test]
    fn test_hints_reasoning_chain() {
        let detector = WorkloadDetector::new();
        let ann = Annotations::default().latency_critical().power_efficient();
        let hints = detector.hints("summarize this article", "llama3:7b", &ann);

        assert_eq!(hints.media_type, MediaType::Text);
        assert!(hints.profile.prefer_low_latency);
        assert!(hints.profile.prefer_low_power);
        // Detection + latency override recorded; power was already preferred
        // by the text preset so no override line for it
        assert!(hints.reasoning.len() >= 2);
        assert!(hints.reasoning[0].contains("detected"));
        assert!(hints.reasoning.iter().any(|r| r.contains("latency")));
    }

    #[test]
    fn test_preset_profiles() {
        let rt = WorkloadProfile::preset(MediaType::Realtime);
        assert!(rt.prefer_low_latency);
        assert!(rt.max_model_size_gb <= 2.0);

        let code = WorkloadProfile::preset(MediaType::Code);
        assert!(!code.prefer_low_latency);
        assert!(code.max_model_size_gb >= 8.0);
    }
}

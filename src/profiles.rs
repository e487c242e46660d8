//! Prompt and loop profile catalogs.
//!
//! The catalogs are fixed at build time; a variant is one (prompt, loop)
//! pair and is immutable once built. The cross product is the population
//! under evaluation (6 x 4 = 24 variants), and startup refuses to run a
//! suspiciously small population unless the caller explicitly capped it.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::runner::LoopSettings;

/// Smallest population accepted without an explicit cap.
pub const MIN_VARIANT_POPULATION: usize = 20;

/// A system-prompt strategy under evaluation.
#[derive(Debug, Clone, Copy)]
pub struct PromptProfile {
    pub id: &'static str,
    pub system_prompt: &'static str,
}

/// A loop-control strategy under evaluation.
#[derive(Debug, Clone, Copy)]
pub struct LoopProfile {
    pub id: &'static str,
    pub max_turn_attempts: u32,
    pub completion_retry_limit: u32,
    pub task_loop_continue_limit: u32,
}

pub const PROMPT_PROFILES: &[PromptProfile] = &[
    PromptProfile {
        id: "baseline",
        system_prompt: "You are a careful coding agent. Work through the task and report what you did.",
    },
    PromptProfile {
        id: "concise",
        system_prompt: "You are a coding agent. Keep answers short and always end with the concrete result.",
    },
    PromptProfile {
        id: "plan-first",
        system_prompt: "You are a coding agent. State a short plan, execute it, then report the outcome.",
    },
    PromptProfile {
        id: "evidence-first",
        system_prompt: "You are a coding agent. Cite the files and paths you inspected before any conclusion.",
    },
    PromptProfile {
        id: "self-verify",
        system_prompt: "You are a coding agent. After finishing, re-check your work and state what you verified.",
    },
    PromptProfile {
        id: "recovery-coach",
        system_prompt: "You are a coding agent. When a tool fails, diagnose the failure before retrying once.",
    },
];

pub const LOOP_PROFILES: &[LoopProfile] = &[
    LoopProfile {
        id: "strict",
        max_turn_attempts: 2,
        completion_retry_limit: 0,
        task_loop_continue_limit: 0,
    },
    LoopProfile {
        id: "standard",
        max_turn_attempts: 3,
        completion_retry_limit: 1,
        task_loop_continue_limit: 1,
    },
    LoopProfile {
        id: "patient",
        max_turn_attempts: 4,
        completion_retry_limit: 2,
        task_loop_continue_limit: 2,
    },
    LoopProfile {
        id: "persistent",
        max_turn_attempts: 6,
        completion_retry_limit: 3,
        task_loop_continue_limit: 4,
    },
];

/// One (prompt profile, loop profile) configuration under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub prompt_profile: String,
    pub loop_profile: String,
}

impl Variant {
    fn new(prompt: &PromptProfile, loop_profile: &LoopProfile) -> Self {
        Self {
            id: format!("{}__{}", prompt.id, loop_profile.id),
            prompt_profile: prompt.id.to_string(),
            loop_profile: loop_profile.id.to_string(),
        }
    }
}

/// Look up a prompt profile by id.
pub fn prompt_profile(id: &str) -> Option<&'static PromptProfile> {
    PROMPT_PROFILES.iter().find(|profile| profile.id == id)
}

/// Look up a loop profile by id.
pub fn loop_profile(id: &str) -> Option<&'static LoopProfile> {
    LOOP_PROFILES.iter().find(|profile| profile.id == id)
}

impl LoopProfile {
    pub fn settings(&self) -> LoopSettings {
        LoopSettings {
            max_turn_attempts: self.max_turn_attempts,
            completion_retry_limit: self.completion_retry_limit,
            task_loop_continue_limit: self.task_loop_continue_limit,
        }
    }
}

/// Cross two catalogs into a variant population.
///
/// With no cap the population must reach [`MIN_VARIANT_POPULATION`]; an
/// explicit cap waives the floor and truncates the population.
pub fn cross_variants(
    prompts: &[PromptProfile],
    loops: &[LoopProfile],
    cap: Option<usize>,
) -> Result<Vec<Variant>, ConfigError> {
    let population = prompts.len() * loops.len();
    if cap.is_none() && population < MIN_VARIANT_POPULATION {
        return Err(ConfigError::VariantPopulationTooSmall {
            population,
            minimum: MIN_VARIANT_POPULATION,
        });
    }

    let mut variants = Vec::with_capacity(population);
    for prompt in prompts {
        for loop_profile in loops {
            variants.push(Variant::new(prompt, loop_profile));
        }
    }
    if let Some(cap) = cap {
        variants.truncate(cap);
    }
    Ok(variants)
}

/// The full 24-variant population.
pub fn build_variants() -> Result<Vec<Variant>, ConfigError> {
    cross_variants(PROMPT_PROFILES, LOOP_PROFILES, None)
}

/// The population truncated to `cap` when one is given.
pub fn build_variants_capped(cap: Option<usize>) -> Result<Vec<Variant>, ConfigError> {
    cross_variants(PROMPT_PROFILES, LOOP_PROFILES, cap)
}

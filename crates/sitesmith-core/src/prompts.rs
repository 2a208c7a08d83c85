//! Model instructions and the conversation narration the pipeline writes.

use crate::llm::{CompletionRequest, Purpose};

const ENHANCE_NEW_SITE: &str = "You are a prompt enhancement specialist. The user wants a new website. \
Rewrite their description into a detailed brief for a web developer.

Enhance it by:
1. Naming the sections and elements the page needs
2. Specifying design details (colors, typography, spacing, layout)
3. Describing interactive behavior where it helps
4. Keeping the user's intent and content unchanged

Return ONLY the enhanced prompt, nothing else.";

const ENHANCE_CHANGE: &str = "You are a prompt enhancement specialist. The user wants to make changes \
to their website. Enhance their request to be more specific and actionable for a web developer.

Enhance this by:
1. Being specific about what elements to change
2. Mentioning design details (colors, spacing, sizes)
3. Clarifying the desired outcome
4. Using clear technical terms

Return ONLY the enhanced request, nothing else. Keep it concise (1-2 sentences).";

const GENERATE_SITE: &str = "You are an expert web developer. Create a complete, production-ready website.

CRITICAL REQUIREMENTS:
- Return ONLY a complete, standalone HTML document.
- Use Tailwind CSS utility classes for ALL styling (NO custom CSS).
- Include the Tailwind CDN script in <head>.
- Include all JavaScript in <script> tags before closing </body>.
- Do not wrap the document in markdown code fences.
- Do not add explanations or commentary before or after the code.";

const APPLY_CHANGE: &str = "You are an expert web developer.

CRITICAL REQUIREMENTS:
- Return ONLY the complete updated HTML code with the requested changes.
- Use Tailwind CSS for ALL styling (NO custom CSS).
- Use Tailwind utility classes for all styling changes.
- Include all JavaScript in <script> tags before closing </body>.
- Make sure it's a complete, standalone HTML document with Tailwind CSS.
- Return the HTML code only, nothing else.

Apply the requested changes while maintaining the Tailwind CSS styling approach.";

/// Rewrite a new-site description.
pub fn enhance_new_site(prompt: &str) -> CompletionRequest {
    CompletionRequest {
        purpose: Purpose::Enhance,
        system: ENHANCE_NEW_SITE.to_string(),
        prompt: prompt.to_string(),
    }
}

/// Rewrite a change request against an existing site.
pub fn enhance_change(message: &str) -> CompletionRequest {
    CompletionRequest {
        purpose: Purpose::Enhance,
        system: ENHANCE_CHANGE.to_string(),
        prompt: format!("User's request: \"{message}\""),
    }
}

pub fn generate_site(enhanced: &str) -> CompletionRequest {
    CompletionRequest {
        purpose: Purpose::Code,
        system: GENERATE_SITE.to_string(),
        prompt: enhanced.to_string(),
    }
}

pub fn apply_change(current_code: &str, enhanced: &str) -> CompletionRequest {
    CompletionRequest {
        purpose: Purpose::Code,
        system: APPLY_CHANGE.to_string(),
        prompt: format!(
            "Here is the current website code: \"{current_code}\" The user wants this change: \"{enhanced}\""
        ),
    }
}

// -- Conversation narration --

pub const INITIAL_VERSION: &str = "Initial version";
pub const CHANGES_MADE: &str = "changes made";

pub const GENERATING_SITE: &str = "Now generating your website...";
pub const MAKING_CHANGES: &str = "Now making changes to your website...";
pub const SITE_READY: &str =
    "I've created your website! You can now preview it and request any changes.";
pub const CHANGES_READY: &str = "I've made the changes to your website! You can now preview it.";

pub fn enhanced_to(enhanced: &str) -> String {
    format!("I've enhanced your prompt to: \"{enhanced}\"")
}

pub fn generation_failed(reason: &str, refunded: i64) -> String {
    format!("Sorry, I couldn't generate that ({reason}). Your {refunded} credits have been refunded.")
}

pub fn rolled_back(version_id: &str) -> String {
    format!("I've rolled your website back to version {version_id}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_prompt_quotes_request() {
        let req = enhance_change("make it blue");
        assert_eq!(req.purpose, Purpose::Enhance);
        assert_eq!(req.prompt, "User's request: \"make it blue\"");
    }

    #[test]
    fn apply_change_embeds_current_code() {
        let req = apply_change("<html></html>", "Use a blue header");
        assert_eq!(req.purpose, Purpose::Code);
        assert!(req.prompt.contains("\"<html></html>\""));
        assert!(req.prompt.ends_with("\"Use a blue header\""));
    }

    #[test]
    fn narration_formats() {
        assert_eq!(enhanced_to("x"), "I've enhanced your prompt to: \"x\"");
        assert!(generation_failed("empty output", 5).contains("5 credits"));
    }
}

/// Combines the caption and the style label into the diffusion prompt.
///
/// Neither input is escaped or shortened.
pub fn build_prompt(caption: &str, style: &str) -> String {
    format!("{caption}. Transform this room into a {style} style.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_caption_and_style() {
        assert_eq!(
            build_prompt("a kitchen", "Minimalist"),
            "a kitchen. Transform this room into a Minimalist style."
        );
    }

    #[test]
    fn inputs_are_used_verbatim() {
        let caption = "a living room with a couch and a television";
        let style = "Art Deco\" {weird} ";

        assert_eq!(
            build_prompt(caption, style),
            format!("{caption}. Transform this room into a {style} style.")
        );
        assert_eq!(build_prompt("", "x"), ". Transform this room into a x style.");
    }
}

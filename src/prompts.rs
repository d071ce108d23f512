/// Instruction sent with every image. The model must answer with one bare
/// JSON object; [`crate::validate::extract_and_validate`] enforces the
/// required keys.
pub const ANALYSIS_PROMPT: &str = "You will be given a single image taken from a PDF document.
Describe it with as much information as the image contains: what kind of image it is \
(diagram, graph, chart, flowchart, table, photo, map, ...) and the data it shows.
Answer with one valid JSON object and nothing else.
The object must contain these keys:
image_type, title, description
Include these keys as well when they apply:
time_period, x-axis, y-axis, sources, sections, labels, ticks, key_patterns
Start your answer with { and end it with }. Do not add any text before or after the JSON object.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_required_keys() {
        for key in ["image_type", "title", "description"] {
            assert!(ANALYSIS_PROMPT.contains(key));
        }
    }
}

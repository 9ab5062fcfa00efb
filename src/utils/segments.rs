/// Non-empty lines of `text`, trimmed, in order.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Splits paragraphs into start, middle and end groups of sizes
/// `P/3`, `P/3` and the remainder.
pub fn split_into_thirds<'a, T>(paragraphs: &'a [T]) -> [&'a [T]; 3] {
    let third = paragraphs.len() / 3;
    let (start, rest) = paragraphs.split_at(third);
    let (middle, end) = rest.split_at(third);
    [start, middle, end]
}

/// Text of each third of `story`, skipping groups that came out empty.
pub fn story_segments(story: &str) -> Vec<String> {
    let paragraphs = split_paragraphs(story);
    split_into_thirds(&paragraphs)
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| group.join("\n"))
        .collect()
}

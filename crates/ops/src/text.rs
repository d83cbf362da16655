//! Console text helpers.

const BANNER_WIDTH: usize = 72;

/// Formats `title` as a large three-line banner framed by `#`.
///
/// The frame widens to fit titles longer than the default width.
pub fn header_very_big(title: &str) -> String {
	let inner = format!("###  {title}  ###");
	let width = inner.chars().count().max(BANNER_WIDTH);
	let rule = "#".repeat(width);
	let pad = width - inner.chars().count();
	let left = pad / 2;
	let centered = format!("{}{inner}{}", "#".repeat(left), "#".repeat(pad - left));
	format!("{rule}\n{centered}\n{rule}\n")
}

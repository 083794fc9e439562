//! SVG card templating.
//!
//! The templates carry text elements with well-known `id` attributes; each
//! metric is written into its element, and a `<id>_dots` sibling gets a dot
//! leader sized so the column lines up. The template is rewritten in place.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::utils::group_digits;

/// Everything the card displays.
#[derive(Debug, Clone)]
pub struct CardData {
    pub age: Option<String>,
    pub commits: u64,
    pub stars: u64,
    pub repos: u64,
    pub contributed: u64,
    pub followers: u64,
    pub loc_added: u64,
    pub loc_deleted: u64,
    pub loc_net: i64,
}

/// Column widths from the card layout; a value shorter than its width gets a
/// dot leader in front of it.
const COMMIT_WIDTH: usize = 22;
const STAR_WIDTH: usize = 14;
const REPO_WIDTH: usize = 6;
const FOLLOWER_WIDTH: usize = 10;
const LOC_NET_WIDTH: usize = 9;
const LOC_DEL_WIDTH: usize = 7;

/// Rewrite one SVG template in place with the card data.
pub fn render_card(path: &Path, data: &CardData) -> Result<()> {
    let svg = fs::read_to_string(path)
        .with_context(|| format!("failed to read SVG template {}", path.display()))?;
    let svg = apply(svg, data);
    fs::write(path, svg)
        .with_context(|| format!("failed to write SVG template {}", path.display()))
}

fn apply(mut svg: String, data: &CardData) -> String {
    if let Some(age) = &data.age {
        svg = replace_element_text(svg, "age_data", age);
    }
    svg = replace_element_text(svg, "contrib_data", &group_digits(data.contributed));
    svg = set_justified(svg, "commit_data", &group_digits(data.commits), COMMIT_WIDTH);
    svg = set_justified(svg, "star_data", &group_digits(data.stars), STAR_WIDTH);
    svg = set_justified(svg, "repo_data", &group_digits(data.repos), REPO_WIDTH);
    svg = set_justified(
        svg,
        "follower_data",
        &group_digits(data.followers),
        FOLLOWER_WIDTH,
    );
    svg = set_justified(svg, "loc_data", &group_digits(data.loc_net), LOC_NET_WIDTH);
    svg = set_justified(svg, "loc_add", &group_digits(data.loc_added), 0);
    svg = set_justified(svg, "loc_del", &group_digits(data.loc_deleted), LOC_DEL_WIDTH);
    svg
}

/// Write `text` into the element carrying `id` and a matching dot leader
/// into the `<id>_dots` element.
fn set_justified(svg: String, id: &str, text: &str, width: usize) -> String {
    let svg = replace_element_text(svg, id, text);
    let pad = width.saturating_sub(text.chars().count());
    let dots = match pad {
        0 => String::new(),
        1 => " ".to_string(),
        2 => ". ".to_string(),
        n => format!(" {} ", ".".repeat(n - 2)),
    };
    replace_element_text(svg, &format!("{id}_dots"), &dots)
}

/// Replace the text content of the element with the given `id`. A template
/// without that element is left untouched.
fn replace_element_text(svg: String, id: &str, text: &str) -> String {
    let marker = format!("id=\"{id}\"");
    let Some(marker_at) = svg.find(&marker) else {
        return svg;
    };
    let after_marker = marker_at + marker.len();
    let Some(open_end) = svg[after_marker..].find('>') else {
        return svg;
    };
    let content_start = after_marker + open_end + 1;
    let Some(content_len) = svg[content_start..].find('<') else {
        return svg;
    };

    let mut out = String::with_capacity(svg.len() + text.len());
    out.push_str(&svg[..content_start]);
    out.push_str(text);
    out.push_str(&svg[content_start + content_len..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = concat!(
        r#"<svg><text><tspan id="age_data">OLD</tspan>"#,
        r#"<tspan id="commit_data_dots"></tspan><tspan id="commit_data">0</tspan>"#,
        r#"<tspan id="star_data_dots"></tspan><tspan id="star_data">0</tspan>"#,
        r#"<tspan id="repo_data_dots"></tspan><tspan id="repo_data">0</tspan>"#,
        r#"<tspan id="contrib_data">0</tspan>"#,
        r#"<tspan id="follower_data_dots"></tspan><tspan id="follower_data">0</tspan>"#,
        r#"<tspan id="loc_data_dots"></tspan><tspan id="loc_data">0</tspan>"#,
        r#"<tspan id="loc_add">0</tspan>"#,
        r#"<tspan id="loc_del_dots"></tspan><tspan id="loc_del">0</tspan>"#,
        "</text></svg>",
    );

    fn sample_data() -> CardData {
        CardData {
            age: Some("4 years, 11 months, 2 days".to_string()),
            commits: 1234,
            stars: 7,
            repos: 42,
            contributed: 45,
            followers: 9,
            loc_added: 40_000,
            loc_deleted: 10_000,
            loc_net: 30_000,
        }
    }

    #[test]
    fn replaces_element_text_by_id() {
        let svg = r#"<tspan id="age_data">OLD</tspan>"#.to_string();
        let out = replace_element_text(svg, "age_data", "NEW");
        assert_eq!(out, r#"<tspan id="age_data">NEW</tspan>"#);
    }

    #[test]
    fn missing_element_leaves_template_untouched() {
        let svg = "<svg><text>nothing here</text></svg>".to_string();
        let out = replace_element_text(svg.clone(), "age_data", "NEW");
        assert_eq!(out, svg);
    }

    #[test]
    fn dot_leader_widths_match_layout() {
        // width 6, "1,234" is 5 chars -> pad 1 -> single space
        let svg = concat!(
            r#"<tspan id="repo_data_dots"></tspan>"#,
            r#"<tspan id="repo_data">0</tspan>"#
        )
        .to_string();
        let out = set_justified(svg, "repo_data", "1,234", 6);
        assert!(out.contains(r#"<tspan id="repo_data_dots"> </tspan>"#));
        assert!(out.contains(r#"<tspan id="repo_data">1,234</tspan>"#));

        // pad 2 -> ". "
        let svg = concat!(
            r#"<tspan id="x_dots"></tspan>"#,
            r#"<tspan id="x">0</tspan>"#
        )
        .to_string();
        let out = set_justified(svg, "x", "1234", 6);
        assert!(out.contains(r#"<tspan id="x_dots">. </tspan>"#));

        // pad 5 -> " ... "
        let svg = concat!(
            r#"<tspan id="y_dots"></tspan>"#,
            r#"<tspan id="y">0</tspan>"#
        )
        .to_string();
        let out = set_justified(svg, "y", "7", 6);
        assert!(out.contains(r#"<tspan id="y_dots"> ... </tspan>"#));

        // width 0 -> no dots
        let svg = concat!(
            r#"<tspan id="z_dots">stale</tspan>"#,
            r#"<tspan id="z">0</tspan>"#
        )
        .to_string();
        let out = set_justified(svg, "z", "123", 0);
        assert!(out.contains(r#"<tspan id="z_dots"></tspan>"#));
    }

    #[test]
    fn render_card_rewrites_template_in_place() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("dark_mode.svg");
        std::fs::write(&path, TEMPLATE).expect("write template");

        let data = sample_data();
        render_card(&path, &data).expect("render");

        let out = std::fs::read_to_string(&path).expect("read back");
        assert!(out.contains(r#"<tspan id="age_data">4 years, 11 months, 2 days</tspan>"#));
        assert!(out.contains(r#"<tspan id="commit_data">1,234</tspan>"#));
        assert!(out.contains(r#"<tspan id="contrib_data">45</tspan>"#));
        assert!(out.contains(r#"<tspan id="loc_data">30,000</tspan>"#));
        assert!(out.contains(r#"<tspan id="loc_add">40,000</tspan>"#));
        assert!(out.contains(r#"<tspan id="loc_del">10,000</tspan>"#));
        // commit width 22, "1,234" is 5 chars -> 17 pad -> 15 dots.
        assert!(out.contains(&format!(
            r#"<tspan id="commit_data_dots"> {} </tspan>"#,
            ".".repeat(15)
        )));
    }

    #[test]
    fn age_is_skipped_when_unknown() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("card.svg");
        std::fs::write(&path, TEMPLATE).expect("write template");

        let mut data = sample_data();
        data.age = None;
        render_card(&path, &data).expect("render");

        let out = std::fs::read_to_string(&path).expect("read back");
        assert!(out.contains(r#"<tspan id="age_data">OLD</tspan>"#));
    }
}

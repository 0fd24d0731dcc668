mod common;

use common::{document, header};
use secmap_core::{
    LineIndex, Locator, LocatorConfig, ParsedLine, ParsedPage, ResolutionMethod, SpanMode,
};

fn scenario_index() -> LineIndex {
    document(
        &[(1, 0, 9), (2, 10, 29), (3, 30, 200)],
        &[(12, "1 Introduction"), (40, "1.1 Scope of Work")],
    )
}

fn scenario_outline() -> Vec<secmap_core::HeaderDescriptor> {
    vec![
        header(0, "Introduction", Some("1"), 1),
        header(1, "Scope of Work", Some("1.1"), 2),
    ]
}

#[test]
fn flat_spans_end_before_the_next_header() {
    let config = LocatorConfig {
        span_mode: SpanMode::Flat,
        ..LocatorConfig::default()
    };
    let resolution = Locator::new(config)
        .unwrap()
        .resolve(&scenario_outline(), &scenario_index())
        .unwrap();

    let intro = resolution.section("1:0").unwrap();
    assert_eq!(intro.number.as_deref(), Some("1"));
    assert_eq!(intro.start_global_idx, Some(12));
    assert_eq!(intro.end_global_idx, Some(39));
    assert_eq!(intro.start_page, Some(2));
    assert_eq!(intro.end_page, Some(3));

    let scope = resolution.section("1.1:1").unwrap();
    assert_eq!(scope.start_global_idx, Some(40));
    assert_eq!(scope.end_global_idx, Some(200));
    assert_eq!(scope.start_page, Some(3));
    assert_eq!(scope.parent_key.as_deref(), Some("1:0"));
    assert_eq!(resolution.summary().count("anchor_resolved"), 2);
}

#[test]
fn nested_spans_contain_their_children() {
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&scenario_outline(), &scenario_index())
        .unwrap();
    let intro = resolution.section("1:0").unwrap();
    let scope = resolution.section("1.1:1").unwrap();
    assert_eq!(intro.start_global_idx, Some(12));
    assert_eq!(intro.end_global_idx, Some(200));
    assert!(intro.contains(scope));
}

#[test]
fn contents_block_does_not_capture_headers() {
    let mut overrides = vec![(0, "Table of Contents".to_string())];
    let titles = [
        "Introduction",
        "Scope of Work",
        "Quality Assurance",
        "Submittals",
        "Execution",
    ];
    for line in 1..=20 {
        let title = titles[(line - 1) % titles.len()];
        overrides.push((line, format!("{line} {title} ........ {}", line * 3)));
    }
    overrides.push((150, "1 Introduction".to_string()));
    let borrowed = overrides
        .iter()
        .map(|(at, text)| (*at, text.as_str()))
        .collect::<Vec<_>>();
    let index = document(&[(0, 0, 199)], &borrowed);

    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&[header(0, "Introduction", Some("1"), 1)], &index)
        .unwrap();
    assert_eq!(resolution.anchors[0].global_index, Some(150));
    let summary = resolution.summary();
    assert_eq!(summary.count("noise_profile_built"), 1);
}

#[test]
fn running_header_text_is_never_an_anchor() {
    let pages = (0..5u32)
        .map(|page| ParsedPage {
            index: page,
            lines: std::iter::once("Company Confidential".to_string())
                .chain((0..20).map(|i| common::filler(page as usize * 100 + i)))
                .chain(std::iter::once(if page == 1 {
                    "1 Introduction".to_string()
                } else {
                    common::filler(page as usize * 100 + 50)
                }))
                .chain((21..30).map(|i| common::filler(page as usize * 100 + i)))
                .map(|text| ParsedLine::from(text.as_str()))
                .collect(),
        })
        .collect();
    let index = LineIndex::from_pages("doc", pages);
    let outline = vec![
        header(0, "Company Confidential", None, 1),
        header(1, "Introduction", Some("1"), 1),
    ];
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&outline, &index)
        .unwrap();
    assert_eq!(resolution.anchors[0].global_index, None);
    assert_eq!(resolution.anchors[0].resolution_method, ResolutionMethod::Fallback);
    assert_eq!(resolution.anchors[1].global_index, Some(52));
    assert!(resolution.summary().count("fallback_triggered") >= 1);
}

#[test]
fn shortened_header_matches_longer_heading_line() {
    let index = document(
        &[(0, 0, 40)],
        &[
            (8, "1 General"),
            (15, "the contractor shall deliver submittals to the engineer"),
            (20, "1.4 Submittals and Shop Drawings"),
        ],
    );
    let outline = vec![
        header(0, "General", Some("1"), 1),
        header(1, "Submittals", Some("1.4"), 2),
    ];
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&outline, &index)
        .unwrap();
    let anchor = &resolution.anchors[1];
    assert_eq!(anchor.global_index, Some(20));
    assert_eq!(anchor.resolution_method, ResolutionMethod::Sequential);
    assert!((anchor.confidence - 1.0).abs() < 1e-6);
}

#[test]
fn missing_header_becomes_a_null_span_section() {
    let outline = vec![
        header(0, "Introduction", Some("1"), 1),
        header(1, "Warranty Provisions", Some("9"), 1),
    ];
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&outline, &scenario_index())
        .unwrap();
    let missing = resolution.section("9:1").unwrap();
    assert_eq!(missing.start_global_idx, None);
    assert_eq!(missing.end_global_idx, None);
    assert_eq!(missing.start_page, None);
    assert_eq!(missing.resolution_method, ResolutionMethod::Fallback);
    assert_eq!(resolution.summary().fallback, 1);
}

#[test]
fn empty_document_falls_back_everywhere() {
    let index = LineIndex::from_pages("empty", Vec::new());
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&scenario_outline(), &index)
        .unwrap();
    assert!(resolution.sections.iter().all(|s| !s.is_located()));
    assert_eq!(resolution.summary().resolved, 0);
}

#[test]
fn resolving_twice_gives_identical_placement() {
    let locator = Locator::new(LocatorConfig::default()).unwrap();
    let index = scenario_index();
    let first = locator.resolve(&scenario_outline(), &index).unwrap();
    let second = locator.resolve(&scenario_outline(), &index).unwrap();
    assert_eq!(first.anchors, second.anchors);
    assert_eq!(first.sections, second.sections);
}

#[test]
fn misnumbered_parent_is_reanchored_by_title() {
    let index = document(
        &[(0, 0, 60)],
        &[(5, "7 General Requirements"), (9, "1.1 Summary of Work")],
    );
    let outline = vec![
        header(0, "General Requirements", Some("1"), 1),
        header(1, "Summary of Work", Some("1.1"), 2),
    ];
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&outline, &index)
        .unwrap();
    assert_eq!(resolution.anchors[0].global_index, Some(5));
    assert_eq!(resolution.anchors[0].resolution_method, ResolutionMethod::Sequential);
    assert_eq!(resolution.summary().reanchored, 1);

    let config = LocatorConfig {
        reanchor: false,
        ..LocatorConfig::default()
    };
    let without = Locator::new(config).unwrap().resolve(&outline, &index).unwrap();
    assert_eq!(without.anchors[0].global_index, None);
}

#[test]
fn numbering_gaps_are_filled_when_enabled() {
    let index = document(
        &[(0, 0, 40)],
        &[
            (2, "3 Products"),
            (6, "3.1 Materials"),
            (15, "3.2 Fabrication"),
            (25, "3.3 Finishes"),
        ],
    );
    let outline = vec![
        header(0, "Products", Some("3"), 1),
        header(1, "Materials", Some("3.1"), 2),
        header(2, "Finishes", Some("3.3"), 2),
    ];
    let config = LocatorConfig {
        fill_numbering_gaps: true,
        ..LocatorConfig::default()
    };
    let resolution = Locator::new(config).unwrap().resolve(&outline, &index).unwrap();
    let numbers = resolution
        .sections
        .iter()
        .map(|s| s.number.clone().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(numbers, vec!["3", "3.1", "3.2", "3.3"]);
    let filled = &resolution.sections[2];
    assert_eq!(filled.title, "Fabrication");
    assert_eq!(filled.start_global_idx, Some(15));
    assert_eq!(filled.end_global_idx, Some(24));
    assert_eq!(filled.resolution_method, ResolutionMethod::GapFill);
    assert_eq!(filled.parent_key.as_deref(), Some("3:0"));
    assert_eq!(resolution.sections[1].end_global_idx, Some(14));
}

#[test]
fn trace_is_written_as_jsonl() {
    let resolution = Locator::new(LocatorConfig::default())
        .unwrap()
        .resolve(&scenario_outline(), &scenario_index())
        .unwrap();
    let mut buffer = Vec::new();
    secmap_core::write_jsonl(&resolution.trace, &mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "run_started");
    let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
    assert_eq!(last["type"], "run_finished");
    assert_eq!(last["resolved"], 2);
}

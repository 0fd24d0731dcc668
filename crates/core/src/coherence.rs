use std::collections::BTreeSet;

use tracing::debug;

use crate::candidate::{CandidateFinder, SearchRequest, SearchWindow};
use crate::outline::PreparedHeader;
use crate::resolver::{Anchor, ResolutionMethod};
use crate::trace::{TraceEventKind, TraceSink};

/// Position of the first child of `headers[pos]`, if the next entry is deeper.
pub fn first_child(headers: &[PreparedHeader], pos: usize) -> Option<usize> {
    let parent = headers.get(pos)?;
    headers
        .get(pos + 1)
        .filter(|next| next.level > parent.level)
        .map(|_| pos + 1)
}

/// Moves parent anchors in front of their first child.
///
/// A parent that landed after its first child, or that fell back while the child
/// resolved, is searched for between the previous resolved anchor and the child
/// using title-only matching; the nearest match to the child wins. Anchors only ever
/// move earlier. Returns the positions of entries left in conflict.
pub fn reanchor(
    headers: &[PreparedHeader],
    anchors: &mut [Anchor],
    finder: &CandidateFinder<'_>,
    sink: &mut dyn TraceSink,
) -> BTreeSet<usize> {
    let mut conflicts = BTreeSet::new();
    for pos in 0..headers.len().min(anchors.len()) {
        let Some(child_pos) = first_child(headers, pos) else {
            continue;
        };
        let Some(child_idx) = anchors[child_pos].global_index else {
            continue;
        };
        let parent_idx = anchors[pos].global_index;
        let inverted = parent_idx.is_some_and(|idx| idx > child_idx);
        if parent_idx.is_some() && !inverted {
            continue;
        }

        let floor = anchors[..pos].iter().rev().find_map(|a| a.global_index);
        let start = floor.map_or(0, |idx| idx + 1);
        let relocated = match child_idx.checked_sub(1) {
            Some(end) if start <= end => {
                let request = SearchRequest {
                    header: &headers[pos],
                    child: None,
                    window: SearchWindow::new(start, end),
                    exclude_through: None,
                    expected_start: end,
                    title_only: true,
                    attempt: 0,
                };
                finder
                    .find(&request, sink)
                    .into_iter()
                    .max_by_key(|c| c.line_ref)
            }
            _ => None,
        };

        match relocated {
            Some(candidate) => {
                debug!(
                    header = %headers[pos].label,
                    to = candidate.line_ref,
                    "moving parent ahead of its first child"
                );
                sink.record(TraceEventKind::AnchorReanchored {
                    header_order: headers[pos].order,
                    from: parent_idx,
                    to: candidate.line_ref,
                    child_order: headers[child_pos].order,
                });
                let anchor = &mut anchors[pos];
                anchor.global_index = Some(candidate.line_ref);
                anchor.confidence = candidate.score().clamp(0.0, 1.0);
                if anchor.resolution_method == ResolutionMethod::Fallback {
                    anchor.resolution_method = finder.strategy().method();
                }
            }
            None => {
                if let Some(parent_index) = parent_idx.filter(|_| inverted) {
                    sink.record(TraceEventKind::ReanchorConflict {
                        header_order: headers[pos].order,
                        parent_index,
                        child_order: headers[child_pos].order,
                        child_index: child_idx,
                    });
                    conflicts.insert(pos);
                    conflicts.insert(child_pos);
                }
            }
        }
    }
    conflicts
}

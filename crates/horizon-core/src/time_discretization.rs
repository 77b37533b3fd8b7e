//! Horizon discretization with event nodes
//!
//! Builds the node grid over `[t0, tf]`: a uniform partition with step `dt`
//! into which every interior event time is spliced as a back-to-back
//! (PreEvent, PostEvent) pair. The interval across an event has zero
//! duration and carries no input. Uniform nodes that would land within a
//! small epsilon of an event are absorbed by it.

use crate::types::Scalar;

/// Minimum spacing between two distinct non-event nodes.
const MIN_NODE_SPACING: Scalar = 1e-6;

/// Event annotation of a grid node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeType {
    /// Plain intermediate or terminal node.
    None,
    /// Node immediately before a state jump.
    PreEvent,
    /// Node immediately after a state jump.
    PostEvent,
}

/// One node of the time grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedTime {
    pub time: Scalar,
    pub event: TimeType,
}

impl AnnotatedTime {
    fn plain(time: Scalar) -> Self {
        Self {
            time,
            event: TimeType::None,
        }
    }
}

/// Start time of the interval beginning at this node. Integration restarts
/// infinitesimally after an event.
pub fn interval_start(node: &AnnotatedTime) -> Scalar {
    node.time
}

/// Duration between two consecutive nodes; zero across an event pair.
pub fn interval_duration(start: &AnnotatedTime, end: &AnnotatedTime) -> Scalar {
    end.time - start.time
}

/// Builds the node grid over `[t0, tf]` with nominal step `dt`, splicing the
/// interior event times in as (PreEvent, PostEvent) pairs.
///
/// The returned sequence is monotone non-decreasing; times only repeat
/// across event pairs. A degenerate horizon (`tf <= t0`) yields a single
/// node.
pub fn time_discretization_with_events(
    t0: Scalar,
    tf: Scalar,
    dt: Scalar,
    event_times: &[Scalar],
) -> Vec<AnnotatedTime> {
    assert!(dt > 0.0, "time step must be positive");

    if tf - t0 < MIN_NODE_SPACING {
        return vec![AnnotatedTime::plain(t0)];
    }

    // interior events only
    let events: Vec<Scalar> = event_times
        .iter()
        .copied()
        .filter(|&e| t0 + MIN_NODE_SPACING < e && e < tf - MIN_NODE_SPACING)
        .collect();

    let num_steps = ((tf - t0) / dt).ceil() as usize;
    let mut grid = Vec::with_capacity(num_steps + 2 * events.len() + 1);
    grid.push(AnnotatedTime::plain(t0));

    let mut next_event = 0usize;
    for k in 1..=num_steps {
        let t = if k == num_steps { tf } else { t0 + k as Scalar * dt };

        // splice events that fall before (or at) this uniform node
        while next_event < events.len() && events[next_event] <= t + MIN_NODE_SPACING {
            let tau = events[next_event];
            // absorb a uniform node that collides with the event
            if (grid.last().unwrap().time - tau).abs() < MIN_NODE_SPACING {
                grid.pop();
            }
            if tau - grid.last().unwrap().time > MIN_NODE_SPACING {
                grid.push(AnnotatedTime {
                    time: tau,
                    event: TimeType::PreEvent,
                });
            } else {
                // snap the previous node onto the event
                let last = grid.last_mut().unwrap();
                last.time = tau;
                last.event = TimeType::PreEvent;
            }
            grid.push(AnnotatedTime {
                time: tau,
                event: TimeType::PostEvent,
            });
            next_event += 1;
        }

        // the uniform node itself, unless it collided with the event
        if t - grid.last().unwrap().time > MIN_NODE_SPACING {
            grid.push(AnnotatedTime::plain(t));
        }
    }

    // terminal node must close the horizon exactly
    if (grid.last().unwrap().time - tf).abs() > MIN_NODE_SPACING {
        grid.push(AnnotatedTime::plain(tf));
    } else {
        grid.last_mut().unwrap().time = tf;
    }

    grid
}

/// Extracts the plain time stamps of a grid.
pub fn to_time_trajectory(grid: &[AnnotatedTime]) -> Vec<Scalar> {
    grid.iter().map(|n| n.time).collect()
}

/// Indices of the PostEvent nodes of a grid.
pub fn post_event_indices(grid: &[AnnotatedTime]) -> Vec<usize> {
    grid.iter()
        .enumerate()
        .filter(|(_, n)| n.event == TimeType::PostEvent)
        .map(|(i, _)| i)
        .collect()
}

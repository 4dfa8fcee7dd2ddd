//! Property tests over the pure parts of the domain: id round-trips,
//! transition-table terminality, and decay clamping.

use proptest::prelude::*;

use caw::domain::clock;
use caw::domain::ids::{TaskId, WorkflowId};
use caw::domain::models::{Memory, TaskStatus, WorkflowStatus};

proptest! {
    #[test]
    fn minted_ids_always_parse_back(_seed in 0u8..32) {
        let wf = WorkflowId::new();
        let tk = TaskId::new();
        prop_assert_eq!(WorkflowId::parse(wf.as_str()).unwrap(), wf);
        prop_assert_eq!(TaskId::parse(tk.as_str()).unwrap(), tk);
    }

    #[test]
    fn arbitrary_strings_never_panic_the_parser(s in ".{0,64}") {
        let _ = WorkflowId::parse(&s);
        let _ = TaskId::parse(&s);
    }

    #[test]
    fn decayed_confidence_stays_in_unit_interval(
        confidence in 0.0f64..=1.0,
        decay_rate in 0.0f64..=2.0,
        age_days in 0i64..=10_000,
    ) {
        let mut memory = Memory::new("topic", "content")
            .with_confidence(confidence)
            .with_decay_rate(decay_rate);
        memory.last_reinforced_at =
            clock::from_ms(clock::now_ms() - age_days * 86_400_000);
        let effective = memory.effective_confidence();
        prop_assert!((0.0..=1.0).contains(&effective));
        prop_assert!(effective <= confidence + 1e-9);
    }

    #[test]
    fn reinforcement_never_exceeds_full_confidence(
        confidence in 0.0f64..=1.0,
        rounds in 0usize..=16,
    ) {
        let mut memory = Memory::new("topic", "content").with_confidence(confidence);
        for _ in 0..rounds {
            memory.reinforce();
        }
        prop_assert!((0.0..=1.0).contains(&memory.confidence));
        prop_assert!(memory.confidence + 1e-9 >= confidence);
    }
}

#[test]
fn terminal_statuses_admit_no_transitions() {
    for status in [TaskStatus::Completed, TaskStatus::Skipped] {
        assert!(status.is_terminal());
        assert!(status.valid_transitions().is_empty());
    }
    for status in [WorkflowStatus::Completed, WorkflowStatus::Abandoned] {
        assert!(status.is_terminal());
        assert!(status.valid_transitions().is_empty());
    }
}

#[test]
fn no_transition_targets_a_source_it_came_from_terminally() {
    // Every transition target that is terminal must itself admit nothing.
    let all_task = [
        TaskStatus::Pending,
        TaskStatus::Planning,
        TaskStatus::InProgress,
        TaskStatus::Paused,
        TaskStatus::Failed,
    ];
    for status in all_task {
        for next in status.valid_transitions() {
            if next.is_terminal() {
                assert!(next.valid_transitions().is_empty());
            }
        }
    }
}

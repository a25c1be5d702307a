// SPDX-License-Identifier: Apache-2.0

//! Compilation-thread activation heuristics.

/// Three-valued answer for activation questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNoMaybe {
    /// Definitely activate.
    Yes,
    /// Definitely do not.
    No,
    /// Borderline; the caller may apply secondary criteria.
    Maybe,
}

/// Queue weight at which the thread with the given index earns its keep.
///
/// The first worker is always justified; each further worker needs
/// roughly double the backlog of the previous one.
const ACTIVATION_THRESHOLDS: [i32; 8] = [0, 60, 120, 240, 480, 960, 1920, 3840];

/// Decides whether a further compilation thread should be activated given
/// the current backlog.
#[must_use]
pub fn should_activate_new_comp_thread(active_threads: usize, queue_weight: i32) -> YesNoMaybe {
    let Some(&threshold) = ACTIVATION_THRESHOLDS.get(active_threads) else {
        return YesNoMaybe::No;
    };
    if queue_weight > threshold {
        YesNoMaybe::Yes
    } else if queue_weight * 2 > threshold {
        YesNoMaybe::Maybe
    } else {
        YesNoMaybe::No
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_thread_is_always_justified() {
        assert_eq!(should_activate_new_comp_thread(0, 1), YesNoMaybe::Yes);
    }

    #[test]
    fn backlog_grows_threads_gradually() {
        assert_eq!(should_activate_new_comp_thread(1, 10), YesNoMaybe::No);
        assert_eq!(should_activate_new_comp_thread(1, 40), YesNoMaybe::Maybe);
        assert_eq!(should_activate_new_comp_thread(1, 100), YesNoMaybe::Yes);
        assert_eq!(should_activate_new_comp_thread(3, 100), YesNoMaybe::No);
    }

    #[test]
    fn thread_table_is_bounded() {
        assert_eq!(
            should_activate_new_comp_thread(64, i32::MAX),
            YesNoMaybe::No
        );
    }
}

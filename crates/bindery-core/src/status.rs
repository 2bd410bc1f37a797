//! Translation of remote agent state strings into local download statuses.

use crate::model::DownloadStatus;

/// Map a qBittorrent state string onto the local lifecycle.
///
/// Returns `None` for states that carry no lifecycle information (errors,
/// stalled or paused downloads, moving, unknown). Callers keep the local
/// status unchanged in that case.
#[must_use]
pub fn translate_remote_state(state: &str) -> Option<DownloadStatus> {
    match state {
        "queuedDL" | "queuedUP" => Some(DownloadStatus::Queued),
        "downloading" | "metaDL" | "forcedMetaDL" | "allocating" | "checkingDL" | "forcedDL" => {
            Some(DownloadStatus::Downloading)
        }
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "forcedUP" | "checkingUP" => {
            Some(DownloadStatus::Completed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_states_map_onto_the_lifecycle() {
        assert_eq!(translate_remote_state("queuedDL"), Some(DownloadStatus::Queued));
        assert_eq!(
            translate_remote_state("metaDL"),
            Some(DownloadStatus::Downloading)
        );
        assert_eq!(
            translate_remote_state("forcedDL"),
            Some(DownloadStatus::Downloading)
        );
        assert_eq!(
            translate_remote_state("stalledUP"),
            Some(DownloadStatus::Completed)
        );
        assert_eq!(
            translate_remote_state("stoppedUP"),
            Some(DownloadStatus::Completed)
        );
    }

    #[test]
    fn unknown_and_error_states_are_ignored() {
        for state in ["error", "missingFiles", "stalledDL", "pausedDL", "moving", "", "Uploading"] {
            assert_eq!(translate_remote_state(state), None, "state {state:?}");
        }
    }

    #[test]
    fn translations_never_outrank_completed() {
        let states = [
            "queuedDL", "queuedUP", "downloading", "metaDL", "allocating", "checkingDL",
            "forcedDL", "uploading", "stalledUP", "pausedUP", "forcedUP", "checkingUP",
        ];
        for state in states {
            let status = translate_remote_state(state);
            assert!(
                status.is_some_and(|status| status.rank() <= DownloadStatus::Completed.rank()),
                "state {state:?}"
            );
        }
    }
}

//! Three-way merge of declared configuration into live configuration
//!
//! Every function takes the previously applied value (`old`, `None` on the
//! first apply), the newly declared value (`new`) and the live value, and
//! reports whether the live value had to change. Keys the declaration never
//! mentioned are left alone, so edits made directly against the live app
//! survive a re-apply.

use std::collections::BTreeMap;

/// Merge a declared map into the live map
pub fn merge_map<V: Clone + PartialEq>(
    old: Option<&BTreeMap<String, V>>,
    new: &BTreeMap<String, V>,
    live: &mut BTreeMap<String, V>,
    force: bool,
) -> bool {
    if force {
        if live == new {
            return false;
        }
        *live = new.clone();
        return true;
    }

    let mut changed = false;
    let Some(old) = old else {
        for (key, value) in new {
            if live.get(key) != Some(value) {
                live.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        return changed;
    };

    for (key, old_value) in old {
        match new.get(key) {
            Some(new_value) => {
                if new_value != old_value && live.get(key) != Some(new_value) {
                    live.insert(key.clone(), new_value.clone());
                    changed = true;
                }
            }
            None => {
                if live.remove(key).is_some() {
                    changed = true;
                }
            }
        }
    }

    for (key, value) in new {
        if !old.contains_key(key) && live.get(key) != Some(value) {
            live.insert(key.clone(), value.clone());
            changed = true;
        }
    }

    changed
}

/// Merge a declared list into the live list, ignoring order
pub fn merge_slice(
    old: Option<&[String]>,
    new: &[String],
    live: &mut Vec<String>,
    force: bool,
) -> bool {
    if force {
        if live.as_slice() == new {
            return false;
        }
        *live = new.to_vec();
        return true;
    }

    let mut changed = false;
    let Some(old) = old else {
        for value in new {
            if !live.contains(value) {
                live.push(value.clone());
                changed = true;
            }
        }
        return changed;
    };

    for value in old {
        if new.contains(value) {
            continue;
        }
        if let Some(pos) = live.iter().position(|v| v == value) {
            live.remove(pos);
            changed = true;
        }
    }

    for value in new {
        if !old.contains(value) && !live.contains(value) {
            live.push(value.clone());
            changed = true;
        }
    }

    changed
}

/// Whether a scalar property needs to change to honor the declaration
pub fn check_property_changed<T: PartialEq + ?Sized>(
    old: Option<&T>,
    new: &T,
    live: &T,
    force: bool,
) -> bool {
    match old {
        Some(old) if !force => new != old && live != new,
        _ => live != new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_map_first_apply_overwrites() {
        let mut live = map(&[("a", "9")]);
        let changed = merge_map(None, &map(&[("a", "1")]), &mut live, false);
        assert!(changed);
        assert_eq!(live, map(&[("a", "1")]));
    }

    #[test]
    fn test_map_first_apply_keeps_unrelated_live_keys() {
        let mut live = map(&[("b", "9"), ("c", "3")]);
        let changed = merge_map(None, &map(&[("a", "1"), ("b", "2")]), &mut live, false);
        assert!(changed);
        assert_eq!(live, map(&[("a", "1"), ("b", "2"), ("c", "3")]));
    }

    #[test]
    fn test_map_steady_state_deletion() {
        let old = map(&[("a", "1"), ("b", "2")]);
        let mut live = map(&[("a", "1"), ("b", "2")]);
        let changed = merge_map(Some(&old), &map(&[("a", "1")]), &mut live, false);
        assert!(changed);
        assert_eq!(live, map(&[("a", "1")]));
    }

    #[test]
    fn test_map_preserves_out_of_band_edit() {
        let old = map(&[("a", "1")]);
        let mut live = map(&[("a", "9")]);
        let changed = merge_map(Some(&old), &map(&[("a", "1")]), &mut live, false);
        assert!(!changed);
        assert_eq!(live, map(&[("a", "9")]));
    }

    #[test]
    fn test_map_propagates_declared_change() {
        let old = map(&[("a", "1")]);
        let mut live = map(&[("a", "1"), ("x", "local")]);
        let changed = merge_map(Some(&old), &map(&[("a", "2"), ("n", "new")]), &mut live, false);
        assert!(changed);
        assert_eq!(live, map(&[("a", "2"), ("n", "new"), ("x", "local")]));
    }

    #[test]
    fn test_map_change_already_live_is_not_reported() {
        let old = map(&[("a", "1")]);
        let mut live = map(&[("a", "2")]);
        assert!(!merge_map(Some(&old), &map(&[("a", "2")]), &mut live, false));
    }

    #[test]
    fn test_map_force_overwrite() {
        let old = map(&[("z", "0")]);
        let new = map(&[("a", "1")]);
        let mut live = map(&[("a", "9"), ("b", "2")]);
        assert!(merge_map(Some(&old), &new, &mut live, true));
        assert_eq!(live, new);

        assert!(!merge_map(None, &new, &mut live, true));
        assert_eq!(live, new);
    }

    #[test]
    fn test_slice_round_trip() {
        let declared = list(&["/data:/data", "/logs:/logs"]);
        let mut live = Vec::new();
        assert!(merge_slice(None, &declared, &mut live, false));
        assert_eq!(live, declared);

        assert!(!merge_slice(Some(&declared), &declared, &mut live, false));
        assert_eq!(live, declared);
    }

    #[test]
    fn test_slice_steady_state() {
        let old = list(&["a", "b"]);
        let mut live = list(&["a", "b", "local"]);
        let changed = merge_slice(Some(&old), &list(&["a", "c"]), &mut live, false);
        assert!(changed);
        assert_eq!(live, list(&["a", "local", "c"]));
    }

    #[test]
    fn test_slice_force() {
        let mut live = list(&["a", "b"]);
        assert!(merge_slice(None, &list(&["c"]), &mut live, true));
        assert_eq!(live, list(&["c"]));
    }

    #[test]
    fn test_property_changed() {
        // no baseline: any difference counts
        assert!(check_property_changed(None, "main", "dev", false));
        assert!(!check_property_changed(None, "main", "main", false));

        // declaration unchanged: live drift is kept
        assert!(!check_property_changed(Some("main"), "main", "dev", false));

        // declaration changed
        assert!(check_property_changed(Some("main"), "release", "main", false));
        assert!(!check_property_changed(Some("main"), "release", "release", false));

        // force compares live with new only
        assert!(check_property_changed(Some("main"), "main", "dev", true));
    }
}

use std::cmp::Ordering;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Opaque handle a container uses to find a member again.
///
/// Only meaningful to the container that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryLocator(pub(crate) usize);

/// A page as listed by a container, before any data has been read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageEntry {
    /// Member path inside the archive.
    pub name: String,
    /// Uncompressed size, as recorded in the archive directory.
    pub size: u64,
    pub locator: EntryLocator,
}

/// Whether a member name looks like a page image.
///
/// Directories, macOS resource forks and metadata files (`ComicInfo.xml`,
/// `Thumbs.db` and friends) are rejected.
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    if name.ends_with('/') || name.starts_with("__MACOSX/") || name.contains("/__MACOSX/") {
        return false;
    }
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if file_name.starts_with("._") {
        return false;
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)),
        _ => false,
    }
}

/// Natural, case-insensitive ordering for member names.
///
/// Runs of ASCII digits compare by numeric value, so `page2.jpg` sorts before
/// `page10.jpg`. Everything else compares by lowercased character. Ties (for
/// example `01.jpg` against `1.jpg`) fall back to a plain byte comparison so
/// the order is total and stable across runs.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let ordering = cmp_digit_runs(&l_run, &r_run);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            },
            (Some(l), Some(r)) => {
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            },
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        run.push(c);
        chars.next();
    }
    run
}

// Compare without parsing, so arbitrarily long runs never overflow.
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Filter raw members down to pages and sort them into reading order.
pub(crate) fn collect_pages(members: impl IntoIterator<Item = PageEntry>) -> Vec<PageEntry> {
    let mut pages: Vec<PageEntry> = members.into_iter().filter(|entry| is_image_name(&entry.name)).collect();
    pages.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("001.jpg", true)]
    #[case("chapter 1/Page 02.JPEG", true)]
    #[case("cover.webp", true)]
    #[case("scan.PNG", true)]
    #[case("anim.gif", true)]
    #[case("old.bmp", true)]
    #[case("ComicInfo.xml", false)]
    #[case("Thumbs.db", false)]
    #[case("images/", false)]
    #[case("__MACOSX/._001.jpg", false)]
    #[case("vol1/__MACOSX/001.jpg", false)]
    #[case("._001.jpg", false)]
    #[case(".jpg", false)]
    #[case("noextension", false)]
    fn test_is_image_name(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_image_name(name), expected);
    }

    #[rstest]
    #[case("page2.jpg", "page10.jpg", Ordering::Less)]
    #[case("Page10.jpg", "page9.jpg", Ordering::Greater)]
    #[case("a.jpg", "B.jpg", Ordering::Less)]
    #[case("ch1/10.png", "ch2/1.png", Ordering::Less)]
    #[case("001.jpg", "01.jpg", Ordering::Less)]
    #[case("cover.jpg", "cover.jpg", Ordering::Equal)]
    #[case("99999999999999999999999.jpg", "100000000000000000000000.jpg", Ordering::Less)]
    fn test_natural_cmp(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(natural_cmp(a, b), expected);
        assert_eq!(natural_cmp(b, a), expected.reverse());
    }

    #[test]
    fn collect_pages_filters_and_sorts() {
        let members = ["10.jpg", "ComicInfo.xml", "2.jpg", "1.jpg", "__MACOSX/._1.jpg"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| PageEntry { name: name.to_string(), size: 0, locator: EntryLocator(i) });
        let names: Vec<String> = collect_pages(members).into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["1.jpg", "2.jpg", "10.jpg"]);
    }
}

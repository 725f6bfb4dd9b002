use runsort::{ExternalSorter, Record, SorterOptions};

fn keyed(line: &str) -> Record {
    let key_len = line.find(' ').expect("space-delimited key");
    Record::new(line.to_string(), key_len).expect("record")
}

fn sort_lines(lines: &[String], capacity: usize, compress: bool) -> Vec<String> {
    let mut sorter = ExternalSorter::new(SorterOptions {
        capacity,
        compress,
        temp_dir: None,
    })
    .expect("sorter");
    for line in lines {
        sorter.push(keyed(line)).expect("push");
    }
    sorter
        .finish()
        .expect("finish")
        .map(|r| r.expect("record").into_line())
        .collect()
}

#[test]
fn scattered_keys_come_out_grouped_and_in_push_order() {
    // subjects interleaved across what will become several chunks
    let mut lines = Vec::new();
    for round in 0..5 {
        for subject in ["<http://ex/c>", "<http://ex/a>", "_:b1", "<http://ex/b>"] {
            lines.push(format!("{subject} <http://ex/p> \"{round}\" ."));
        }
    }
    let sorted = sort_lines(&lines, 3, false);
    assert_eq!(sorted.len(), lines.len());

    let keys: Vec<&str> = sorted.iter().map(|l| l.split(' ').next().unwrap()).collect();
    let mut expected_keys = keys.clone();
    expected_keys.sort();
    assert_eq!(keys, expected_keys, "byte-wise key order");

    // each key forms exactly one contiguous run, and within it push order is kept
    for subject in ["<http://ex/a>", "<http://ex/b>", "<http://ex/c>", "_:b1"] {
        let run: Vec<&String> = sorted.iter().filter(|l| l.starts_with(subject)).collect();
        let rounds: Vec<String> = run
            .iter()
            .map(|l| l.split('"').nth(1).unwrap().to_string())
            .collect();
        assert_eq!(rounds, vec!["0", "1", "2", "3", "4"]);
        let first = sorted.iter().position(|l| l.starts_with(subject)).unwrap();
        assert!(sorted[first..first + 5].iter().all(|l| l.starts_with(subject)));
    }
}

#[cfg(feature = "zstd")]
#[test]
fn compressed_chunks_sort_the_same() {
    let lines: Vec<String> = (0..500)
        .map(|i| format!("<http://ex/s{}> <http://ex/p> \"v{i}\" .", (i * 7919) % 113))
        .collect();
    let plain = sort_lines(&lines, 37, false);
    let packed = sort_lines(&lines, 37, true);
    assert_eq!(plain, packed);
}

#[test]
fn single_chunk_when_input_fits() {
    let lines = vec!["b x".to_string(), "a y".to_string()];
    let mut sorter = ExternalSorter::new(SorterOptions {
        capacity: 10,
        compress: false,
        temp_dir: None,
    })
    .unwrap();
    for line in &lines {
        sorter.push(keyed(line)).unwrap();
    }
    assert!(sorter.chunks().is_empty());
    let merge = sorter.finish().unwrap();
    assert_eq!(merge.open_sources(), 1);
    let out: Vec<String> = merge.map(|r| r.unwrap().into_line()).collect();
    assert_eq!(out, vec!["a y", "b x"]);
}

#[test]
fn scratch_dir_honours_parent() {
    let parent = tempfile::tempdir().unwrap();
    let mut sorter = ExternalSorter::new(SorterOptions {
        capacity: 1,
        compress: false,
        temp_dir: Some(parent.path().to_path_buf()),
    })
    .unwrap();
    assert!(sorter.scratch_dir().starts_with(parent.path()));
    sorter.push(keyed("k v")).unwrap();
    let merge = sorter.finish().unwrap();
    assert_eq!(merge.count(), 1);
    assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
}

//! End-to-end tests of feature group construction, packed multiplexing,
//! serialization, and splits.
//!
//! Packed-group columns here keep the exclusivity contract: for every
//! row at most one sub-feature holds a non-most-frequent value.

use binfeat::{BinFeatError, BinMapper, DataSize, FeatureGroup, MissingType, VecBinaryWriter};

/// Numerical mapper over unit-width bins: value v lands in bin
/// min(round(v), num_bin - 1).
fn unit_mapper(num_bin: i32, most_freq_bin: u32, sparse_rate: f64) -> BinMapper {
    let mut bounds: Vec<f64> = (0..num_bin - 1).map(|i| i as f64 + 0.5).collect();
    bounds.push(f64::INFINITY);
    BinMapper::numerical(bounds, MissingType::None, most_freq_bin, 0, sparse_rate).unwrap()
}

fn load_group(group: &mut FeatureGroup, columns: &[Vec<f64>]) {
    for (sub_feature, values) in columns.iter().enumerate() {
        for (row, &value) in values.iter().enumerate() {
            group.push(0, sub_feature, row as DataSize, value);
        }
    }
    group.finish_load().unwrap();
}

fn assert_reads_back(group: &FeatureGroup, columns: &[Vec<f64>]) {
    for (sub_feature, values) in columns.iter().enumerate() {
        let mapper = group.bin_mapper(sub_feature);
        let expected: Vec<u32> = values.iter().map(|&v| mapper.value_to_bin(v)).collect();
        let mut iter = group.sub_feature_iterator(sub_feature);
        for (row, &bin) in expected.iter().enumerate() {
            assert_eq!(
                iter.get(row as DataSize),
                bin,
                "sub-feature {} row {}",
                sub_feature,
                row
            );
        }
    }
}

#[test]
fn test_packed_two_feature_layout() {
    // 4 bins with mfb 2 contribute 4 codes, 3 bins with mfb 0 contribute
    // 2 (the elided bin needs no code)
    let mappers = vec![unit_mapper(4, 2, 0.0), unit_mapper(3, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 5).unwrap();
    assert!(!group.is_multi_val());
    assert!(!group.is_sparse());
    assert_eq!(group.bin_offsets(), &[1, 5, 7]);
    assert_eq!(group.num_total_bin(), 7);
    assert_eq!(group.feature_min_bin(0), 1);
    assert_eq!(group.feature_max_bin(0), 4);
    assert_eq!(group.feature_min_bin(1), 5);
    assert_eq!(group.feature_max_bin(1), 6);

    let col_a = vec![0.0, 2.0, 3.0, 2.0, 2.0]; // bins 0 2 3 2 2, mfb 2
    let col_b = vec![0.0, 2.0, 0.0, 1.0, 0.0]; // bins 0 2 0 1 0, mfb 0
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);
    assert_reads_back(&group, &[col_a, col_b]);
}

#[test]
fn test_group_iterator_sees_packed_codes() {
    let mappers = vec![unit_mapper(4, 2, 0.0), unit_mapper(3, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 5).unwrap();
    // row 0: A bin 0 -> code 1; row 2: A bin 3 -> code 4;
    // row 1: B bin 2 -> code 6; row 3: B bin 1 -> code 5; row 4 elided
    group.push(0, 0, 0, 0.0);
    group.push(0, 0, 2, 3.0);
    group.push(0, 1, 1, 2.0);
    group.push(0, 1, 3, 1.0);
    group.finish_load().unwrap();

    let mut iter = group.feature_group_iterator().unwrap();
    assert_eq!(iter.raw_get(0), 1);
    assert_eq!(iter.raw_get(1), 6);
    assert_eq!(iter.raw_get(2), 4);
    assert_eq!(iter.raw_get(3), 5);
    assert_eq!(iter.raw_get(4), 0);
}

#[test]
fn test_multi_val_mode_selection() {
    // sub-feature 0 is dense, sub-feature 1 crosses the sparse threshold;
    // multi-val columns are independent, so rows may overlap
    let mappers = vec![unit_mapper(4, 1, 0.2), unit_mapper(5, 0, 0.9)];
    let mut group = FeatureGroup::new(2, true, mappers, 6).unwrap();
    assert!(group.is_multi_val());
    assert!(!group.is_sparse()); // group-level flag is packed-only

    let col_a = vec![1.0, 0.0, 3.0, 1.0, 2.0, 1.0];
    let col_b = vec![0.0, 0.0, 4.0, 0.0, 0.0, 2.0];
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);
    assert_reads_back(&group, &[col_a, col_b]);
    assert!(group.feature_group_iterator().is_none());
}

#[test]
fn test_multi_val_per_column_storage_selection() {
    // each sub-feature picks its own storage from its sparse rate
    let mappers = vec![
        unit_mapper(4, 0, 0.1),
        unit_mapper(4, 0, 0.9),
        unit_mapper(4, 0, 0.5),
    ];
    let mapper_bytes: usize = mappers.iter().map(|m| m.sizes_in_byte()).sum();
    let group = FeatureGroup::new(3, true, mappers, 100).unwrap();
    // dense columns hold one u8 lane per row (100 bytes); an empty
    // sparse column is its 4-byte count plus the terminal delta (5)
    assert_eq!(group.sizes_in_byte(), 6 + mapper_bytes + 100 + 5 + 100);
}

#[test]
fn test_multi_val_finish_load_reports_column_failure() {
    // the duplicate row sits in the sparse sub-feature; its merge error
    // must surface through the parallel seal
    let mappers = vec![unit_mapper(4, 0, 0.0), unit_mapper(4, 0, 0.9)];
    let mut group = FeatureGroup::new(2, true, mappers, 10).unwrap();
    group.push(0, 1, 3, 2.0);
    group.push(0, 1, 3, 1.0);
    let err = group.finish_load().unwrap_err();
    assert!(matches!(err, BinFeatError::Precondition { .. }));
}

#[test]
fn test_save_load_round_trip_is_byte_identical() {
    let mappers = vec![unit_mapper(4, 2, 0.0), unit_mapper(3, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 5).unwrap();
    let col_a = vec![0.0, 2.0, 3.0, 2.0, 2.0];
    let col_b = vec![0.0, 2.0, 0.0, 1.0, 0.0];
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);

    let mut writer = VecBinaryWriter::new();
    let written = group.save_binary(&mut writer).unwrap();
    assert_eq!(written, group.sizes_in_byte());

    let (restored, consumed) = FeatureGroup::from_bytes(writer.as_bytes(), 5, None).unwrap();
    assert_eq!(consumed, written);
    assert_eq!(restored.num_feature(), group.num_feature());
    assert_eq!(restored.bin_offsets(), group.bin_offsets());
    assert_reads_back(&restored, &[col_a, col_b]);

    // re-serializing the restored group reproduces the exact image
    let mut rewriter = VecBinaryWriter::new();
    restored.save_binary(&mut rewriter).unwrap();
    assert_eq!(rewriter.as_bytes(), writer.as_bytes());
}

#[test]
fn test_subset_deserialization_matches_full() {
    let mappers = vec![unit_mapper(6, 3, 0.0), unit_mapper(4, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 8).unwrap();
    let col_a = vec![3.0, 1.0, 5.0, 3.0, 0.0, 3.0, 3.0, 4.0];
    let col_b = vec![0.0, 0.0, 0.0, 1.0, 0.0, 3.0, 2.0, 0.0];
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);

    let mut writer = VecBinaryWriter::new();
    group.save_binary(&mut writer).unwrap();

    let used: Vec<DataSize> = vec![1, 3, 4, 6];
    let (subset, consumed) =
        FeatureGroup::from_bytes(writer.as_bytes(), 8, Some(&used)).unwrap();
    assert_eq!(consumed, writer.len()); // full source image is consumed
    assert_eq!(subset.num_data(), 4);

    for (sub_feature, values) in [col_a, col_b].iter().enumerate() {
        let mut iter = subset.sub_feature_iterator(sub_feature);
        for (new_row, &old_row) in used.iter().enumerate() {
            let expected = subset
                .bin_mapper(sub_feature)
                .value_to_bin(values[old_row as usize]);
            assert_eq!(iter.get(new_row as DataSize), expected);
        }
    }
}

#[test]
fn test_copy_subrow_matches_subset_load() {
    let mappers = vec![unit_mapper(6, 3, 0.0), unit_mapper(4, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 8).unwrap();
    let col_a = vec![3.0, 1.0, 5.0, 3.0, 0.0, 3.0, 3.0, 4.0];
    let col_b = vec![0.0, 0.0, 0.0, 1.0, 0.0, 3.0, 2.0, 0.0];
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);

    let used: Vec<DataSize> = vec![0, 2, 5, 7];
    let mut subset = FeatureGroup::from_other(&group, used.len() as DataSize).unwrap();
    subset.copy_subrow(&group, &used).unwrap();

    for (sub_feature, values) in [col_a, col_b].iter().enumerate() {
        let mut iter = subset.sub_feature_iterator(sub_feature);
        for (new_row, &old_row) in used.iter().enumerate() {
            let expected = subset
                .bin_mapper(sub_feature)
                .value_to_bin(values[old_row as usize]);
            assert_eq!(iter.get(new_row as DataSize), expected);
        }
    }
}

#[test]
fn test_split_is_stable_and_complete() {
    let mappers = vec![unit_mapper(4, 2, 0.0), unit_mapper(3, 0, 0.0)];
    let mut group = FeatureGroup::new(2, false, mappers, 8).unwrap();
    let col_a = vec![2.0, 0.0, 3.0, 2.0, 2.0, 1.0, 2.0, 2.0];
    let col_b = vec![0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 1.0, 0.0];
    load_group(&mut group, &[col_a.clone(), col_b.clone()]);

    for (sub_feature, values) in [col_a, col_b].iter().enumerate() {
        let mapper = group.bin_mapper(sub_feature);
        for threshold in 0..mapper.num_bin() as u32 {
            let data_indices: Vec<DataSize> = (0..8).collect();
            let mut lte = vec![0; 8];
            let mut gt = vec![0; 8];
            let cnt = group.split(
                sub_feature,
                &[threshold],
                false,
                &data_indices,
                &mut lte,
                &mut gt,
            );

            let expected_lte: Vec<DataSize> = data_indices
                .iter()
                .copied()
                .filter(|&i| mapper.value_to_bin(values[i as usize]) <= threshold)
                .collect();
            let expected_gt: Vec<DataSize> = data_indices
                .iter()
                .copied()
                .filter(|&i| mapper.value_to_bin(values[i as usize]) > threshold)
                .collect();
            assert_eq!(&lte[..cnt as usize], expected_lte.as_slice());
            assert_eq!(&gt[..8 - cnt as usize], expected_gt.as_slice());
        }
    }
}

#[test]
fn test_missing_values_route_by_default_left() {
    // NaN owns the last bin; it is also the mapper's default bin
    let mapper = BinMapper::numerical(
        vec![1.0, f64::INFINITY, f64::NAN],
        MissingType::Nan,
        0,
        2,
        0.0,
    )
    .unwrap();
    let mut group = FeatureGroup::new(1, false, vec![mapper], 3).unwrap();
    load_group(&mut group, &[vec![0.5, 2.0, f64::NAN]]);

    let data_indices: Vec<DataSize> = vec![0, 1, 2];
    let mut lte = vec![0; 3];
    let mut gt = vec![0; 3];

    let cnt = group.split(0, &[0], false, &data_indices, &mut lte, &mut gt);
    assert_eq!(cnt, 1);
    assert_eq!(&lte[..1], &[0]);
    assert_eq!(&gt[..2], &[1, 2]); // NaN row goes right

    let cnt = group.split(0, &[0], true, &data_indices, &mut lte, &mut gt);
    assert_eq!(cnt, 2);
    assert_eq!(&lte[..2], &[0, 2]); // NaN row goes left
    assert_eq!(&gt[..1], &[1]);
}

#[test]
fn test_resize_extends_and_truncates() {
    let mut group = FeatureGroup::new(1, false, vec![unit_mapper(3, 0, 0.0)], 4).unwrap();
    load_group(&mut group, &[vec![1.0, 0.0, 2.0, 1.0]]);

    group.resize(2);
    assert_eq!(group.num_data(), 2);
    let mut iter = group.sub_feature_iterator(0);
    assert_eq!(iter.get(1), 0);
    drop(iter);

    group.resize(5);
    let mut iter = group.sub_feature_iterator(0);
    assert_eq!(iter.get(0), 1);
    assert_eq!(iter.get(4), 0); // new rows read as the most frequent bin
}

#[test]
fn test_bin_to_value_representatives() {
    let group = FeatureGroup::new(1, false, vec![unit_mapper(4, 0, 0.0)], 1).unwrap();
    assert_eq!(group.bin_to_value(0, 0), 0.5);
    assert_eq!(group.bin_to_value(0, 1), 1.0);
    assert_eq!(group.bin_to_value(0, 3), 2.5); // unbounded top bin
}

#[test]
fn test_from_bytes_rejects_truncated_image() {
    let mut group = FeatureGroup::new(1, false, vec![unit_mapper(3, 0, 0.0)], 4).unwrap();
    load_group(&mut group, &[vec![1.0, 0.0, 2.0, 1.0]]);
    let mut writer = VecBinaryWriter::new();
    group.save_binary(&mut writer).unwrap();

    let image = writer.as_bytes();
    assert!(FeatureGroup::from_bytes(&image[..image.len() - 1], 4, None).is_err());
    assert!(FeatureGroup::from_bytes(&image[..3], 4, None).is_err());
}

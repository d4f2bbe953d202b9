use proptest::prelude::*;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use skyfs_core::cipher::FileKey;
use skyfs_core::rs_codec::RsCodec;
use skyfs_core::types::File;
use skyfs_core::version::{create_version, decode_version, sha256_hex, RedundancyPolicy};
use skyfs_core::ErrorKind;

fn plain_file(name: &str) -> File {
    File {
        id: "f1".into(),
        owner_id: "r1".into(),
        name: name.into(),
        is_dir: false,
        access_list: vec![],
        aes_key: String::new(),
        aes_iv: String::new(),
        versions: vec![],
    }
}

/// Keeps exactly `k` randomly chosen shards.
fn keep_k(shards: &[Vec<u8>], k: usize, seed: u64) -> Vec<Option<Vec<u8>>> {
    let mut idx: Vec<usize> = (0..shards.len()).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let keep = &idx[..k];
    shards
        .iter()
        .enumerate()
        .map(|(i, s)| keep.contains(&i).then(|| s.clone()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_k_shards_rebuild_the_version(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        k in 1usize..=6,
        m in 1usize..=4,
        seed in any::<u64>(),
    ) {
        let key = FileKey::generate();
        let encoded = create_version(&plain_file("a.bin"), &key, &data, &RedundancyPolicy::fixed(k, m)).unwrap();
        let v = &encoded.version;
        prop_assert_eq!(v.blocks.len(), k + m);
        prop_assert_eq!(v.num_data_blocks, k);
        prop_assert_eq!(v.num_parity_blocks, m);
        prop_assert_eq!(v.size as usize, data.len());
        prop_assert_eq!((v.upload_size + v.padding_bytes) as usize, encoded.shards[0].len() * k);
        for (b, s) in v.blocks.iter().zip(&encoded.shards) {
            prop_assert_eq!(&b.sha256_hash, &sha256_hex(s));
            prop_assert_eq!(b.size as usize, s.len());
        }

        let subset = keep_k(&encoded.shards, k, seed);
        let out = decode_version(&key, v, subset).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn codec_recovers_from_any_m_losses(
        k in 1usize..=8,
        m in 1usize..=4,
        len in 1usize..512,
        seed in any::<u64>(),
    ) {
        let codec = RsCodec::new(k, m).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<Vec<u8>> = (0..k)
            .map(|_| (0..len).map(|_| rand::Rng::gen::<u8>(&mut rng)).collect())
            .collect();
        let mut all = data.clone();
        all.extend(codec.parity_for(&data).unwrap());
        let mut shards = keep_k(&all, k, seed ^ 0x5a5a);
        codec.reconstruct(&mut shards).unwrap();
        let rebuilt: Vec<Vec<u8>> = shards.into_iter().map(|s| s.unwrap()).collect();
        prop_assert_eq!(rebuilt, all);
    }
}

#[test]
fn fewer_than_k_shards_is_an_error() {
    let key = FileKey::generate();
    let data = vec![7u8; 1000];
    let encoded = create_version(&plain_file("a.bin"), &key, &data, &RedundancyPolicy::fixed(3, 2)).unwrap();
    let shards = keep_k(&encoded.shards, 2, 1);
    let err = decode_version(&key, &encoded.version, shards).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn corrupted_shard_fails_authentication() {
    let key = FileKey::generate();
    let data = vec![1u8; 300];
    let encoded = create_version(&plain_file("a.bin"), &key, &data, &RedundancyPolicy::fixed(2, 1)).unwrap();
    let mut shards: Vec<Option<Vec<u8>>> = encoded.shards.iter().cloned().map(Some).collect();
    if let Some(s) = shards[0].as_mut() {
        s[0] ^= 0xff;
    }
    assert!(decode_version(&key, &encoded.version, shards).is_err());
}

#[test]
fn versions_of_one_file_get_distinct_nonces() {
    let key = FileKey::generate();
    let f = plain_file("a.bin");
    let a = create_version(&f, &key, b"same bytes", &RedundancyPolicy::fixed(1, 1)).unwrap();
    let b = create_version(&f, &key, b"same bytes", &RedundancyPolicy::fixed(1, 1)).unwrap();
    assert_ne!(a.version.nonce_salt, b.version.nonce_salt);
    assert_ne!(a.shards[0], b.shards[0]);
}

#[test]
fn folders_have_no_versions() {
    let mut f = plain_file("docs");
    f.is_dir = true;
    let err = create_version(&f, &FileKey::generate(), b"x", &RedundancyPolicy::fixed(1, 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn codec_limits() {
    assert!(RsCodec::new(0, 1).is_err());
    assert!(RsCodec::new(1, 0).is_err());
    assert!(RsCodec::new(200, 57).is_err());
    assert!(RsCodec::new(200, 56).is_ok());
    assert_eq!(RsCodec::new(2, usize::MAX).err().map(|e| e.kind()), Some(ErrorKind::Validation));
    assert_eq!(RsCodec::new(usize::MAX, 1).err().map(|e| e.kind()), Some(ErrorKind::Validation));
}

#[test]
fn oversized_redundancy_policies_are_rejected() {
    let f = plain_file("a.bin");
    let key = FileKey::generate();
    let policies = [
        RedundancyPolicy::fixed(2, usize::MAX),
        RedundancyPolicy::fixed(200, 57),
        RedundancyPolicy::Ratio { target_block_size: 1, max_data_blocks: 4, parity_ratio: 1e300 },
    ];
    for policy in &policies {
        let err = create_version(&f, &key, b"payload", policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{policy:?}");
    }
}

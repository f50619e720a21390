//! End-to-end pipeline tests against a mocked API and media origin.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bget_engine::{NullSink, Pipeline, PipelineConfig, PipelineError, RemuxConfig, Remuxer};
use bili_api::{ApiError, AutoPicker, BiliClient, ClientConfig, EncodingVariant, VariantPicker};
use httpmock::MockServer;
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn mock_nav(server: &MockServer, code: i64) {
    server.mock(|when, then| {
        when.method(GET).path("/nav");
        then.status(200).json_body(json!({
            "code": code,
            "message": if code == 0 { "0" } else { "not logged in" },
            "data": {"isLogin": code == 0, "mid": 7, "uname": "tester", "vipStatus": 0}
        }));
    });
}

fn mock_view(server: &MockServer, bvid: &str, title: &str, parts: &[(u64, &str)]) {
    let pages: Vec<_> = parts
        .iter()
        .enumerate()
        .map(|(idx, (cid, name))| {
            json!({"cid": cid, "page": idx + 1, "from": "vupload", "part": name})
        })
        .collect();
    server.mock(|when, then| {
        when.method(GET)
            .path("/x/web-interface/view")
            .query_param("bvid", bvid);
        then.status(200).json_body(json!({
            "code": 0,
            "message": "0",
            "data": {"bvid": bvid, "aid": 1, "pic": "https://cdn/cover.jpg", "title": title, "pages": pages}
        }));
    });
}

/// One playurl mock per part, answering both the unlocked discovery fetch
/// and the quality-locked re-fetch with the same offer.
fn mock_playurl<'a>(
    server: &'a MockServer,
    cid: u64,
    video_url: &str,
    audio_url: &str,
) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/x/player/playurl")
            .query_param("cid", cid.to_string())
            .query_param("fourk", "1")
            .query_param("fnval", "4048");
        then.status(200).json_body(json!({
            "code": 0,
            "message": "0",
            "data": {
                "accept_format": "hdflv2,mp4",
                "accept_quality": [80, 64],
                "dash": {
                    "video": [
                        {"id": 64, "baseUrl": "https://unused/v64.m4s", "bandwidth": 1000},
                        {"id": 80, "baseUrl": video_url, "bandwidth": 2000}
                    ],
                    "audio": [{"id": 30216, "baseUrl": audio_url, "bandwidth": 67}]
                }
            }
        }));
    })
}

#[cfg(unix)]
fn stub_ffmpeg(dir: &Path) -> (String, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let log = dir.join("ffmpeg-args.log");
    let path = dir.join("ffmpeg-stub");
    let script = format!(
        "#!/bin/sh\nprintf '%s\\n' \"$@\" >> {log}\nfor a in \"$@\"; do last=\"$a\"; done\necho merged > \"$last\"\n",
        log = log.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (path.to_string_lossy().into_owned(), log)
}

struct TestEnv {
    root: tempfile::TempDir,
    out_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let out_dir = root.path().join("out");
        let tmp_dir = root.path().join("tmp");
        Self {
            root,
            out_dir,
            tmp_dir,
        }
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn leftover_temps(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.tmp_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn pipeline(
    server: &MockServer,
    env: &TestEnv,
    picker: Arc<dyn VariantPicker>,
    ffmpeg_path: Option<String>,
) -> Pipeline {
    pipeline_with(server, env, picker, ffmpeg_path, 1)
}

fn pipeline_with(
    server: &MockServer,
    env: &TestEnv,
    picker: Arc<dyn VariantPicker>,
    ffmpeg_path: Option<String>,
    part_workers: usize,
) -> Pipeline {
    let client = BiliClient::new(ClientConfig::default().with_api_base(server.base_url())).unwrap();
    let config = PipelineConfig::default()
        .with_output_dir(&env.out_dir)
        .with_tmp_dir(&env.tmp_dir)
        .with_part_workers(part_workers);
    let mut pipeline = Pipeline::new(
        client,
        config,
        Arc::new(NullSink),
        picker,
        CancellationToken::new(),
    );
    if let Some(path) = ffmpeg_path {
        pipeline = pipeline.with_remuxer(Remuxer::with_config(
            RemuxConfig::default().with_ffmpeg_path(path),
        ));
    }
    pipeline
}

/// Picker that cancels on the nth call and otherwise takes the top pick.
struct CancelOn {
    nth: usize,
    calls: AtomicUsize,
}

impl CancelOn {
    fn new(nth: usize) -> Self {
        Self {
            nth,
            calls: AtomicUsize::new(0),
        }
    }
}

impl VariantPicker for CancelOn {
    fn pick(&self, _label: &str, _choices: &[EncodingVariant]) -> Option<usize> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.nth {
            None
        } else {
            Some(0)
        }
    }
}

#[cfg(unix)]
#[tokio::test]
async fn two_part_asset_downloads_and_remuxes_end_to_end() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();
    let (ffmpeg, args_log) = stub_ffmpeg(env.root());

    mock_nav(&server, 0);
    mock_view(
        &server,
        "BV1demo",
        "demo:video",
        &[(301, "p?1"), (302, "intro")],
    );
    let playurl_a = mock_playurl(
        &server,
        301,
        &server.url("/media/301/v80.m4s"),
        &server.url("/media/301/a.m4s"),
    );
    let playurl_b = mock_playurl(
        &server,
        302,
        &server.url("/media/302/v80.m4s"),
        &server.url("/media/302/a.m4s"),
    );

    let mut media = Vec::new();
    for path in [
        "/media/301/v80.m4s",
        "/media/301/a.m4s",
        "/media/302/v80.m4s",
        "/media/302/a.m4s",
    ] {
        media.push(server.mock(|when, then| {
            when.method(GET)
                .path(path)
                .header("referer", "https://www.bilibili.com/video/BV1demo");
            then.status(200).body("stream-bytes");
        }));
    }

    let report = pipeline(&server, &env, Arc::new(AutoPicker), Some(ffmpeg))
        .run("BV1demo")
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 0);

    // Output names derive from the sanitized title and part names.
    assert!(env.out_dir.join("demo_video_p_1.mkv").exists());
    assert!(env.out_dir.join("demo_video_intro.mkv").exists());

    // Two-phase stream fetch: discovery plus quality-locked re-fetch.
    playurl_a.assert_hits(2);
    playurl_b.assert_hits(2);
    for mock in &media {
        mock.assert();
    }

    // The merge consumed exactly the downloaded temp pair of each part.
    let log = std::fs::read_to_string(&args_log).unwrap();
    let input_flags = log.lines().filter(|l| *l == "-i").count();
    let temp_inputs = log.lines().filter(|l| l.ends_with(".tmp")).count();
    assert_eq!(input_flags, 4);
    assert_eq!(temp_inputs, 4);
    assert!(env.leftover_temps().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn identity_failure_does_not_abort_the_run() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();
    let (ffmpeg, _log) = stub_ffmpeg(env.root());

    mock_nav(&server, -101);
    mock_view(&server, "BV1solo", "solo", &[(400, "only")]);
    mock_playurl(
        &server,
        400,
        &server.url("/media/400/v80.m4s"),
        &server.url("/media/400/a.m4s"),
    );
    for path in ["/media/400/v80.m4s", "/media/400/a.m4s"] {
        server.mock(|when, then| {
            when.method(GET).path(path);
            then.status(200).body("stream-bytes");
        });
    }

    let report = pipeline(&server, &env, Arc::new(AutoPicker), Some(ffmpeg))
        .run("BV1solo")
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert!(env.out_dir.join("solo_only.mkv").exists());
}

#[tokio::test]
async fn prompt_cancellation_skips_downloads_and_remux() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();

    mock_nav(&server, 0);
    mock_view(&server, "BV1sel", "selectable", &[(500, "p1")]);
    let playurl = mock_playurl(
        &server,
        500,
        &server.url("/media/500/v80.m4s"),
        &server.url("/media/500/a.m4s"),
    );
    let video = server.mock(|when, then| {
        when.method(GET).path("/media/500/v80.m4s");
        then.status(200).body("stream-bytes");
    });

    // Accept the video pick, cancel the audio pick.
    let report = pipeline(&server, &env, Arc::new(CancelOn::new(1)), None)
        .run("BV1sel")
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.parts.is_empty());
    // Only the discovery fetch ran; nothing was downloaded or remuxed.
    playurl.assert_hits(1);
    video.assert_hits(0);
    assert!(!env.out_dir.exists() || std::fs::read_dir(&env.out_dir).unwrap().next().is_none());
}

#[tokio::test]
async fn missing_asset_is_fatal() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();

    // No /nav mock either: the identity fetch fails at transport level and
    // is tolerated; the missing asset is not.
    server.mock(|when, then| {
        when.method(GET).path("/x/web-interface/view");
        then.status(200).json_body(json!({"code": -404, "message": "啥都木有"}));
    });

    let err = pipeline(&server, &env, Arc::new(AutoPicker), None)
        .run("BV404")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Api(ApiError::NotFound { code: -404, .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn concurrent_parts_report_in_source_order() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();
    let (ffmpeg, _log) = stub_ffmpeg(env.root());

    mock_nav(&server, 0);
    mock_view(
        &server,
        "BV1par",
        "parallel",
        &[(701, "first"), (702, "second"), (703, "third")],
    );
    for cid in [701u64, 702, 703] {
        mock_playurl(
            &server,
            cid,
            &server.url(format!("/media/{cid}/v80.m4s")),
            &server.url(format!("/media/{cid}/a.m4s")),
        );
        for kind in ["v80", "a"] {
            let path = format!("/media/{cid}/{kind}.m4s");
            server.mock(move |when, then| {
                when.method(GET).path(path);
                then.status(200).body("stream-bytes");
            });
        }
    }

    let report = pipeline_with(&server, &env, Arc::new(AutoPicker), Some(ffmpeg), 3)
        .run("BV1par")
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 3);
    let names: Vec<&str> = report.parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
    assert!(env.leftover_temps().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn part_failure_is_collected_and_other_parts_still_complete() {
    let server = MockServer::start_async().await;
    let env = TestEnv::new();
    let (ffmpeg, _log) = stub_ffmpeg(env.root());

    mock_nav(&server, 0);
    mock_view(&server, "BV1mix", "mixed", &[(601, "broken"), (602, "fine")]);
    mock_playurl(
        &server,
        601,
        &server.url("/media/601/v80.m4s"),
        &server.url("/media/601/a.m4s"),
    );
    mock_playurl(
        &server,
        602,
        &server.url("/media/602/v80.m4s"),
        &server.url("/media/602/a.m4s"),
    );
    // Part 601's video source rejects the request; its audio would succeed.
    server.mock(|when, then| {
        when.method(GET).path("/media/601/v80.m4s");
        then.status(404);
    });
    for path in ["/media/601/a.m4s", "/media/602/v80.m4s", "/media/602/a.m4s"] {
        server.mock(|when, then| {
            when.method(GET).path(path);
            then.status(200).body("stream-bytes");
        });
    }

    let report = pipeline(&server, &env, Arc::new(AutoPicker), Some(ffmpeg))
        .run("BV1mix")
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);
    assert!(report.parts[0].outcome.is_err());
    assert!(env.out_dir.join("mixed_fine.mkv").exists());
    assert!(!env.out_dir.join("mixed_broken.mkv").exists());
    // The failed part's completed sibling download was cleaned up too.
    assert!(env.leftover_temps().is_empty());
}

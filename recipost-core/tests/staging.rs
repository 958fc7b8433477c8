mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use recipost_core::staging::{
    AnswerFilePrompt, OperatorDecision, PromptRequest, ScriptedPrompt, StagingError,
    VideoFailureKind,
};
use recipost_core::Content;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{source_images, stager, test_config, ScriptedExecutor, ScriptedRun};

fn recipe(images: Vec<String>, video: Option<&str>) -> Content {
    Content {
        title: "Mapo tofu".into(),
        body: "Sichuan peppercorn, doubanjiang, silken tofu.".into(),
        images,
        video: video.map(str::to_string),
        ..Content::default()
    }
}

#[tokio::test]
async fn failed_image_download_is_dropped_without_reordering() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let images = source_images(dir.path(), 5);
    std::fs::remove_file(dir.path().join("source/step_1.jpg")).unwrap();

    let staged = stager(&config, Arc::new(ScriptedPrompt::default()))
        .stage(&recipe(images, None))
        .await
        .unwrap();

    let contents: Vec<String> = staged
        .image_paths
        .iter()
        .map(|path| std::fs::read_to_string(path).unwrap())
        .collect();
    assert_eq!(contents, vec!["image 0", "image 2", "image 3", "image 4"]);
    assert!(staged
        .image_paths
        .iter()
        .all(|path| path.starts_with(&staged.run_dir)));
    assert!(staged.run_dir.starts_with(config.staging_root()));
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SeenRequest {
    path: String,
    referer: Option<String>,
}

/// Serves `/img{n}.jpg` with body `img{n}`, answering 404 for the listed paths.
async fn serve_images(missing: &'static [&'static str]) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut raw = Vec::new();
                let mut buf = [0u8; 1024];
                while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&raw).to_string();
                let mut lines = head.lines();
                let path = lines
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or_default()
                    .to_string();
                let referer = lines
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("referer"))
                    .map(|(_, value)| value.trim().to_string());
                log.lock().unwrap().push(SeenRequest {
                    path: path.clone(),
                    referer,
                });

                let response = if missing.contains(&path.as_str()) {
                    "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_string()
                } else {
                    let body = path
                        .trim_start_matches('/')
                        .trim_end_matches(".jpg")
                        .to_string();
                    format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: image/jpeg\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    )
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (base, seen)
}

#[tokio::test]
async fn http_404_drops_one_image_and_every_request_carries_the_recipe_referer() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let (base, seen) = serve_images(&["/img1.jpg"]).await;
    let images = (0..5).map(|i| format!("{base}/img{i}.jpg")).collect();
    let content = Content {
        source_url: Some("https://recipes.example.com/mapo-tofu?ref=feed".into()),
        ..recipe(images, None)
    };

    let staged = stager(&config, Arc::new(ScriptedPrompt::default()))
        .stage(&content)
        .await
        .unwrap();

    let contents: Vec<String> = staged
        .image_paths
        .iter()
        .map(|path| std::fs::read_to_string(path).unwrap())
        .collect();
    assert_eq!(contents, vec!["img0", "img2", "img3", "img4"]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(seen
        .iter()
        .all(|request| request.referer.as_deref() == Some("https://recipes.example.com/")));
}

#[tokio::test]
async fn image_list_is_capped_and_blank_entries_ignored() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let mut images = source_images(dir.path(), 12);
    images.insert(0, "   ".to_string());

    let staged = stager(&config, Arc::new(ScriptedPrompt::default()))
        .stage(&recipe(images, None))
        .await
        .unwrap();

    assert_eq!(staged.image_paths.len(), config.platform.max_images);
    assert_eq!(
        std::fs::read_to_string(&staged.image_paths[0]).unwrap(),
        "image 0"
    );
}

#[tokio::test]
async fn placeholder_stands_in_when_every_image_fails() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    let placeholder = dir.path().join("placeholder.jpg");
    std::fs::write(&placeholder, b"placeholder").unwrap();
    config.staging.placeholder_image = Some("placeholder.jpg".into());
    let missing = vec![format!("file://{}/nope.jpg", dir.path().display())];

    let staged = stager(&config, Arc::new(ScriptedPrompt::default()))
        .stage(&recipe(missing.clone(), None))
        .await
        .unwrap();
    assert_eq!(staged.image_paths, vec![placeholder]);

    config.staging.placeholder_image = None;
    let err = stager(&config, Arc::new(ScriptedPrompt::default()))
        .stage(&recipe(missing, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::NoMedia));
}

#[tokio::test]
async fn bot_check_is_retried_after_the_operator_refreshes_cookies() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.cookies_file(), "# Netscape HTTP Cookie File\n").unwrap();
    let executor = ScriptedExecutor::new([
        ScriptedRun::failure(
            "[youtube] abc123: Downloading webpage\nERROR: [youtube] abc123: Sign in to confirm you're not a bot\n",
        ),
        ScriptedRun::success(),
    ]);
    let prompt = Arc::new(ScriptedPrompt::new([OperatorDecision::Continue]));
    let stager = stager(&config, prompt.clone()).with_executor(executor.clone());

    let staged = stager
        .stage(&recipe(
            source_images(dir.path(), 1),
            Some("https://www.youtube.com/watch?v=abc123"),
        ))
        .await
        .unwrap();

    let video = staged.video_path.unwrap();
    assert!(video.exists());
    assert!(staged.image_paths.is_empty());
    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains(&"--cookies".to_string()));
    assert!(calls[0].contains(&"--no-playlist".to_string()));
    let asked = prompt.asked();
    assert_eq!(asked.len(), 1);
    assert!(matches!(
        &asked[0],
        PromptRequest::RefreshCredentials {
            kind: VideoFailureKind::BotCheck,
            ..
        }
    ));
}

#[tokio::test]
async fn unattended_run_resumes_once_the_cookie_export_appears() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let executor = ScriptedExecutor::new([ScriptedRun::success()]);
    let prompt = AnswerFilePrompt::new(
        config.staging_root(),
        Duration::from_millis(10),
        Duration::from_secs(10),
    );
    let stager = stager(&config, Arc::new(prompt)).with_executor(executor.clone());

    let cookies = config.cookies_file();
    let operator = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(&cookies, "# Netscape HTTP Cookie File\n")
            .await
            .unwrap();
    });
    let staged = stager
        .stage(&recipe(
            source_images(dir.path(), 1),
            Some("https://youtu.be/abc123"),
        ))
        .await
        .unwrap();
    operator.await.unwrap();

    assert!(staged.video_path.unwrap().exists());
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn skipping_the_video_falls_back_to_images() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let executor = ScriptedExecutor::new(Vec::new());
    let prompt = Arc::new(ScriptedPrompt::new([OperatorDecision::Skip]));
    let stager = stager(&config, prompt.clone()).with_executor(executor.clone());

    let staged = stager
        .stage(&recipe(
            source_images(dir.path(), 2),
            Some("https://youtu.be/abc123"),
        ))
        .await
        .unwrap();

    assert!(staged.video_path.is_none());
    assert_eq!(staged.image_paths.len(), 2);
    assert!(executor.calls().is_empty());
    assert!(matches!(
        prompt.asked().as_slice(),
        [PromptRequest::MissingCredentials { .. }]
    ));
}

#[tokio::test]
async fn sign_in_wall_then_skip_leaves_no_video() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.cookies_file(), "").unwrap();
    let executor = ScriptedExecutor::new([ScriptedRun::failure(
        "ERROR: [vimeo] 42: This video is private. Please sign in to view it",
    )]);
    let prompt = Arc::new(ScriptedPrompt::new([OperatorDecision::Skip]));
    let stager = stager(&config, prompt.clone()).with_executor(executor.clone());

    let video = stager
        .stage_video("https://vimeo.com/42", dir.path())
        .await
        .unwrap();

    assert!(video.is_none());
    assert_eq!(executor.calls().len(), 1);
    assert!(matches!(
        prompt.asked().as_slice(),
        [PromptRequest::RefreshCredentials {
            kind: VideoFailureKind::SignInRequired,
            ..
        }]
    ));
}

#[tokio::test]
async fn unrecognised_downloader_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.cookies_file(), "").unwrap();
    let executor = ScriptedExecutor::new([ScriptedRun::failure(
        "ERROR: Unsupported URL: https://www.youtube.com/feed/library",
    )]);
    let prompt = Arc::new(ScriptedPrompt::default());
    let stager = stager(&config, prompt.clone()).with_executor(executor);

    let err = stager
        .stage(&recipe(
            source_images(dir.path(), 1),
            Some("https://www.youtube.com/feed/library"),
        ))
        .await
        .unwrap_err();

    match err {
        StagingError::Video(detail) => assert!(detail.contains("Unsupported URL")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(prompt.asked().is_empty());
}

#[tokio::test]
async fn expired_run_directories_are_pruned() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.staging.retention_hours = 0;
    let stale = config.staging_root().join("run_20240101_000000_deadbeef");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("old.jpg"), b"old").unwrap();
    std::thread::sleep(Duration::from_millis(1_100));

    let stager = stager(&config, Arc::new(ScriptedPrompt::default()));
    assert_eq!(stager.prune_expired().unwrap(), 1);
    assert!(!stale.exists());
}

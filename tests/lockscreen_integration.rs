mod common;

use std::time::Duration;

use common::write_gif;
use image::codecs::gif::Repeat;
use lockscreen_image::config::Configuration;
use lockscreen_image::lockscreen::LockScreen;
use lockscreen_image::math::Vector2D;
use lockscreen_image::widgets::CursorShape;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

fn config_for(gif: &std::path::Path) -> Configuration {
    let yaml = format!(
        r#"
outputs:
  - name: left
    width: 200
    height: 120
  - name: right
    width: 160
    height: 160
images:
  - path: "{}"
    size: 60
    border_size: 0
    onclick: "true"
  - path: "{}"
    monitor: right
    size: 20
    halign: left
    valign: top
"#,
        gif.display(),
        gif.display()
    );
    serde_yaml::from_str::<Configuration>(&yaml)
        .unwrap()
        .validated()
        .unwrap()
}

#[tokio::test]
async fn lock_screen_decodes_draws_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let gif = dir.path().join("face.gif");
    write_gif(&gif, &[40, 40], Some(Repeat::Infinite));
    let cfg = config_for(&gif);

    let mut lock = LockScreen::new(&cfg, Handle::current()).unwrap();
    assert_eq!(lock.widgets("left").len(), 1);
    assert_eq!(lock.widgets("right").len(), 2);
    assert!(lock.widgets("nowhere").is_empty());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            cancel.cancel();
        });
    }
    lock.run(cancel).await.unwrap();

    for output in ["left", "right"] {
        for widget in lock.widgets(output) {
            let w = widget.borrow();
            assert!(w.resource_id().is_some());
            assert!(!w.is_pending());
            assert!(w.current_texture().is_some());
            assert_eq!(w.frame_count(), 2);
        }
    }
    // both outputs share one decode of the same file
    let left = lock.widgets("left")[0].borrow().resource_id();
    let right = lock.widgets("right")[0].borrow().resource_id();
    assert_eq!(left, right);

    lock.render_all();
    let center = Vector2D::new(100.0, 60.0);
    assert_eq!(lock.pointer_motion("left", center), CursorShape::Pointer);
    assert_eq!(lock.pointer_motion("left", Vector2D::new(2.0, 2.0)), CursorShape::Default);

    let shots = lock.snapshot(&dir.path().join("shots")).unwrap();
    assert_eq!(shots.len(), 2);
    let left_png = image::open(&shots[0]).unwrap().to_rgba8();
    assert_eq!(left_png.dimensions(), (200, 120));
    let px = left_png.get_pixel(100, 60).0;
    assert!(px[0] > 200 && px[2] < 60, "center should show the image, got {px:?}");
    assert_eq!(left_png.get_pixel(0, 0).0, [0, 0, 0, 255]);

    lock.shutdown();
    assert!(lock.widgets("left").is_empty());
    assert!(lock.context().is_terminating());
}

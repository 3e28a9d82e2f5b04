use approx::assert_abs_diff_eq;
use ndarray::Array3;

use crate::vision::Vision;

fn temp_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "latent_inpaint_vision_{}_{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_transform_and_inverse() {
    let image = Array3::from_shape_fn((2, 2, 3), |(y, x, c)| [0.0, 127.5, 255.0][(y + x + c) % 3]);
    let transformed = Vision::transform(&image);
    assert_abs_diff_eq!(transformed[[0, 0, 0]], -1.0);
    assert_abs_diff_eq!(transformed[[0, 0, 1]], 0.0);
    assert_abs_diff_eq!(transformed[[0, 0, 2]], 1.0);
    let back = Vision::inverse_transform(&transformed) * 255.0;
    for (a, b) in back.iter().zip(image.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓保存、载入↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
#[test]
fn test_save_load_image() {
    let dir = temp_dir("save_load");
    let path = dir.join("gradient.png");
    let image = Array3::from_shape_fn((8, 8, 3), |(y, x, c)| (y * 30 + x * 2 + c * 7) as f32);
    Vision::save_image(image.view(), &path).unwrap();

    // 尺寸不变时，载入后映射回[0,255]应与原图一致
    let loaded = Vision::load_image(&path, 8, false).unwrap();
    assert_eq!(loaded.shape(), &[8, 8, 3]);
    let restored = Vision::inverse_transform(&loaded) * 255.0;
    for (a, b) in restored.iter().zip(image.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
    }

    // 裁剪+缩放只检查形状与取值范围
    let resized = Vision::load_image(&path, 4, true).unwrap();
    assert_eq!(resized.shape(), &[4, 4, 3]);
    assert!(resized.iter().all(|v| (-1.0..=1.0).contains(v)));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_to_rgb_image_clamps() {
    let image = Array3::from_shape_vec((1, 2, 3), vec![-20.0, 0.4, 255.6, 300.0, 127.5, 12.0])
        .unwrap();
    let rgb = Vision::to_rgb_image(image.view()).unwrap();
    assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
    assert_eq!(rgb.get_pixel(1, 0).0, [255, 128, 12]);

    let gray = Array3::<f32>::zeros((2, 2, 1));
    assert!(Vision::to_rgb_image(gray.view()).is_err());
}
//*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑保存、载入↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑

#[test]
fn test_save_masks_writes_npy_and_png() {
    let dir = temp_dir("masks");
    let masks = Array3::from_shape_fn((3, 4, 5), |(b, y, x)| ((b + y + x) % 2) as f32);
    let png = dir.join("00.png");
    let npy = dir.join("00.npy");
    Vision::save_masks(masks.view(), 2, &png, &npy).unwrap();

    let loaded: Array3<f32> = ndarray_npy::read_npy(&npy).unwrap();
    assert_eq!(loaded, masks);
    let rendered = image::open(&png).unwrap().to_rgb8();
    // 2行2列的网格
    assert_eq!(rendered.dimensions(), (10, 8));
    assert_eq!(rendered.get_pixel(0, 0).0, [0, 0, 0]);
    assert_eq!(rendered.get_pixel(1, 0).0, [255, 255, 255]);

    std::fs::remove_dir_all(&dir).unwrap();
}

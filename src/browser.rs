//! Browser Launcher
//!
//! Handles Chrome discovery and launching with a throwaway profile.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cdp::transport::launch_chrome;
use crate::cdp::{Connection, Transport};
use crate::error::{Error, Result};
use crate::page::Page;
use crate::LaunchConfig;

/// Global counter for unique user data directories
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Locate a Chrome/Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

fn launch_args(config: &LaunchConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-popup-blocking".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

/// A launched Chrome instance
pub struct Browser {
    connection: Connection,
    user_data_dir: PathBuf,
}

impl Browser {
    /// Launch with default config
    pub async fn launch() -> Result<Self> {
        Self::launch_with_config(LaunchConfig::default()).await
    }

    /// Launch with custom config
    pub async fn launch_with_config(config: LaunchConfig) -> Result<Self> {
        let instance_id = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "pinokio-inspector-{}-{}",
            std::process::id(),
            instance_id
        ));
        let _ = std::fs::remove_dir_all(&user_data_dir);
        std::fs::create_dir_all(&user_data_dir)?;

        let chrome_path = match &config.chrome_path {
            Some(p) => PathBuf::from(p),
            None => find_chrome()?,
        };

        tracing::info!("Launching Chrome from {:?}", chrome_path);
        let (child, ws_url) = launch_chrome(&chrome_path, &launch_args(&config, &user_data_dir))?;
        let connection = Connection::new(Transport::new(child, &ws_url)?);

        let version = connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);

        Ok(Self {
            connection,
            user_data_dir,
        })
    }

    /// Open a tab ready for inspection and navigate it to `url`
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let page = self.new_blank_page().await?;
        page.goto(url).await?;
        Ok(page)
    }

    /// Open a tab at about:blank
    pub async fn new_blank_page(&self) -> Result<Page> {
        let target_id = self
            .connection
            .create_target("about:blank", None, None)
            .await?;
        let session = self.connection.attach_to_target(&target_id).await?;
        Page::attach(session).await
    }

    /// Get the browser version
    pub async fn version(&self) -> Result<String> {
        Ok(self.connection.version().await?.product)
    }

    /// Close a tab
    pub async fn close_page(&self, page: &Page) -> Result<()> {
        page.mark_closed();
        self.connection
            .close_target(page.session().target_id())
            .await?;
        Ok(())
    }

    /// Close the browser
    pub async fn close(self) -> Result<()> {
        self.connection.close().await?;
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The Transport's Drop impl kills the Chrome process
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
    }
}

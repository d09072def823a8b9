//! Embedded static HTML served by the viewer endpoint.
//!
//! Kept as a `&'static str` so the binary needs no asset directory.

pub const VIEWER_HTML: &str = r#"
<!doctype html>
<html lang="en">

<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Engagement Monitor</title>
  <style>
    body {
      margin: 0;
      min-height: 100vh;
      display: flex;
      flex-direction: column;
      align-items: center;
      gap: 1rem;
      padding: 1.5rem;
      box-sizing: border-box;
      background: #101418;
      color: #e6edf3;
      font-family: ui-sans-serif, system-ui, sans-serif;
    }

    #video {
      max-width: 100%;
      border: 1px solid #30363d;
      border-radius: 6px;
    }

    .stats {
      display: grid;
      grid-template-columns: repeat(3, minmax(8rem, 1fr));
      gap: 0.75rem;
    }

    .stat {
      padding: 0.75rem 1rem;
      background: #161b22;
      border: 1px solid #30363d;
      border-radius: 6px;
      text-align: center;
    }

    .stat span {
      display: block;
      font-size: 0.75rem;
      text-transform: uppercase;
      color: #8b949e;
    }

    .stat strong {
      font-size: 1.5rem;
    }

    #status.closed {
      color: #f85149;
    }
  </style>
</head>

<body>
  <h1>Engagement Monitor</h1>
  <img id="video" src="/video_feed" alt="Live video feed" />

  <div class="stats">
    <div class="stat"><span>FPS</span><strong id="fps">0</strong></div>
    <div class="stat"><span>Level</span><strong id="level">N/A</strong></div>
    <div class="stat"><span>Modus</span><strong id="modus">N/A</strong></div>
  </div>
  <p id="status">Connecting&hellip;</p>

  <script>
    const fields = {
      fps: document.getElementById("fps"),
      level: document.getElementById("level"),
      modus: document.getElementById("modus"),
    };
    const status = document.getElementById("status");
    const source = new EventSource("/stats_feed");

    source.onopen = () => {
      status.textContent = "Live";
      status.classList.remove("closed");
    };

    source.onmessage = (event) => {
      const stats = JSON.parse(event.data);
      fields.fps.textContent = stats.fps;
      fields.level.textContent = stats.level;
      fields.modus.textContent = stats.modus;
    };

    source.onerror = () => {
      status.textContent = "Stream ended";
      status.classList.add("closed");
      source.close();
    };
  </script>
</body>

</html>
"#;

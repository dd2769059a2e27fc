//! Embedded control page served at `/`.

pub(crate) const CONTROL_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Microscope Viewer</title>
    <style>
        body { margin: 0; background: #1a1a1a; color: #fff;
               font-family: -apple-system, 'Segoe UI', Arial, sans-serif; }
        .container { display: flex; height: 100vh; }
        .sidebar { width: 280px; background: #252525; padding: 16px;
                   overflow-y: auto; border-right: 1px solid #333; }
        .main { flex: 1; display: flex; align-items: center; justify-content: center; }
        h1 { font-size: 18px; margin: 0 0 20px 0; }
        h3 { font-size: 12px; color: #999; text-transform: uppercase;
             letter-spacing: 0.5px; margin: 18px 0 8px 0; }
        label { display: block; font-size: 13px; color: #ccc; margin: 8px 0 4px 0; }
        input[type="range"] { width: 100%; }
        .value { color: #0066cc; font-weight: 600; margin-left: 6px; }
        .buttons { display: grid; grid-template-columns: 1fr 1fr; gap: 6px; }
        button { background: #333; border: 1px solid #444; color: #fff;
                 padding: 9px 12px; border-radius: 6px; cursor: pointer; font-size: 13px; }
        button:hover { background: #3a3a3a; }
        button.primary { background: #0066cc; border-color: #0066cc; grid-column: 1 / -1; }
        #feed { max-width: 100%; max-height: 100vh; background: #000; border: 2px solid #333; }
    </style>
</head>
<body>
<div class="container">
    <div class="sidebar">
        <h1>Microscope Controls</h1>

        <h3>Image</h3>
        <label>Brightness <span class="value" id="brightness-v">0</span></label>
        <input type="range" id="brightness" min="-100" max="100" value="0">
        <label>Contrast <span class="value" id="contrast-v">1.0</span></label>
        <input type="range" id="contrast" min="10" max="300" value="100">
        <label>Saturation <span class="value" id="saturation-v">1.0</span></label>
        <input type="range" id="saturation" min="0" max="300" value="100">
        <label>Gain <span class="value" id="gain-v">1.0</span></label>
        <input type="range" id="gain" min="20" max="300" value="100">

        <h3>Orientation</h3>
        <div class="buttons">
            <button onclick="post('/process/flip_h/toggle')">Flip H</button>
            <button onclick="post('/process/flip_v/toggle')">Flip V</button>
            <button onclick="post('/process/rotate/-90')">&#8634; 90&deg;</button>
            <button onclick="post('/process/rotate/90')">&#8635; 90&deg;</button>
        </div>

        <h3>Zoom</h3>
        <label>Level <span class="value" id="zoom-v">100%</span></label>
        <input type="range" id="zoom" min="50" max="400" value="100" step="10">

        <h3>Stabilization</h3>
        <div class="buttons">
            <button class="primary" onclick="post('/process/stabilize/toggle')">Toggle Stabilizer</button>
        </div>
        <label>Noise floor <span class="value" id="stab_noise-v">5</span></label>
        <input type="range" id="stab_noise" min="0" max="100" value="5">
        <label>Smoothing <span class="value" id="stab_smooth-v">30</span></label>
        <input type="range" id="stab_smooth" min="0" max="99" value="30">
        <label>Decay <span class="value" id="stab_decay-v">60</span></label>
        <input type="range" id="stab_decay" min="0" max="100" value="60">
        <label>Blend depth <span class="value" id="stab_blend-v">2</span></label>
        <input type="range" id="stab_blend" min="1" max="10" value="2">
        <div class="buttons">
            <button onclick="post('/process/stab_reset')">Reset Tuning</button>
        </div>

        <h3>Capture</h3>
        <label>Capture FPS <span class="value" id="cap-fps-v">30</span></label>
        <input type="range" id="cap-fps" min="1" max="30" value="30">
        <label>JPEG quality <span class="value" id="quality-v">75</span></label>
        <input type="range" id="quality" min="10" max="100" value="75" step="5">
        <label>Stream FPS <span class="value" id="stream-fps-v">29</span></label>
        <input type="range" id="stream-fps" min="1" max="29" value="29">

        <h3>Actions</h3>
        <div class="buttons">
            <button class="primary" onclick="post('/process/reset')">Reset All Settings</button>
            <button class="primary" onclick="screenshot()">Take Screenshot</button>
        </div>
    </div>
    <div class="main">
        <img id="feed" src="/stream.mjpg" alt="Microscope feed">
    </div>
</div>
<script>
    function post(path) {
        fetch(path, { method: 'POST' }).catch(err => console.error('control post failed:', err));
    }
    function slider(id, path, display) {
        const input = document.getElementById(id);
        const value = document.getElementById(id + '-v');
        input.addEventListener('input', () => { value.textContent = display(input.value); });
        input.addEventListener('change', () => post(path + '/' + input.value));
    }
    const raw = v => v;
    const percent = v => (v / 100).toFixed(1);

    slider('brightness', '/process/brightness', raw);
    slider('contrast', '/process/contrast', percent);
    slider('saturation', '/process/saturation', percent);
    slider('gain', '/process/gain', percent);
    slider('zoom', '/process/zoom', v => v + '%');
    slider('stab_noise', '/process/stab_noise', raw);
    slider('stab_smooth', '/process/stab_smooth', raw);
    slider('stab_decay', '/process/stab_decay', raw);
    slider('stab_blend', '/process/stab_blend', raw);

    const capFps = document.getElementById('cap-fps');
    capFps.addEventListener('input', () => {
        document.getElementById('cap-fps-v').textContent = capFps.value;
    });
    capFps.addEventListener('change', () => post('/capture/fps/' + capFps.value));

    const quality = document.getElementById('quality');
    quality.addEventListener('input', () => {
        document.getElementById('quality-v').textContent = quality.value;
    });
    quality.addEventListener('change', () => post('/capture/quality/' + quality.value));

    const streamFps = document.getElementById('stream-fps');
    const feed = document.getElementById('feed');
    streamFps.addEventListener('input', () => {
        document.getElementById('stream-fps-v').textContent = streamFps.value;
        feed.src = '/stream.mjpg?fps=' + streamFps.value + '&t=' + Date.now();
    });

    function screenshot() {
        fetch('/current.jpg')
            .then(r => r.blob())
            .then(blob => {
                const a = document.createElement('a');
                a.href = URL.createObjectURL(blob);
                a.download = 'microscope_' + new Date().toISOString().replace(/[:.]/g, '-') + '.jpg';
                a.click();
                URL.revokeObjectURL(a.href);
            })
            .catch(err => console.error('screenshot failed:', err));
    }
</script>
</body>
</html>
"#;

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Deforest Vision</title>
  <style>
    body { font-family: sans-serif; margin: 24px; color: #222; }
    .row { display: flex; flex-wrap: wrap; gap: 12px; margin: 12px 0; }
    .row figure { margin: 0; }
    .row img { max-width: 280px; border: 1px solid #ccc; }
    pre { background: #f6f6f6; padding: 12px; white-space: pre-wrap; }
    #status { font-family: monospace; font-size: 12px; color: #777; }
  </style>
</head>
<body>
  <h2>Deforest Vision</h2>
  <form id="upload">
    <input type="file" name="files" accept=".png,.jpg,.jpeg,.gif,.bmp" multiple required>
    <input type="text" name="prompt" placeholder="Optional question" size="40">
    <button type="submit">Analyze</button>
    <span id="status">idle</span>
  </form>
  <div id="results" hidden>
    <h3>Overlays</h3>
    <div class="row" id="overlays"></div>
    <h3>Trend</h3>
    <img id="trend" alt="trend chart">
    <h3>Panel</h3>
    <img id="panel" alt="comparison panel" style="max-width:100%">
    <h3>Ask</h3>
    <form id="chat">
      <input type="text" name="message" placeholder="How much forest was lost?" size="50" required>
      <button type="submit">Send</button>
    </form>
    <pre id="reply"></pre>
  </div>
  <h3>Question without images</h3>
  <form id="query">
    <input type="text" name="query" placeholder="Deforestation rate in Borneo from 2015 to 2020?" size="50" required>
    <button type="submit">Ask</button>
  </form>
  <pre id="answer"></pre>
  <script>
  (function(){
    const status = (t)=>{ document.getElementById('status').textContent = t; };
    let current = null;
    document.getElementById('upload').onsubmit = async (ev)=>{
      ev.preventDefault();
      status('analyzing...');
      const resp = await fetch('/upload', { method: 'POST', body: new FormData(ev.target) });
      const body = await resp.json();
      if(!resp.ok){ status(body.code + ': ' + body.message); return; }
      current = body;
      const row = document.getElementById('overlays');
      row.innerHTML = '';
      body.pairs.forEach((pair, i)=>{
        const fig = document.createElement('figure');
        const cap = document.createElement('figcaption');
        if(body.overlay_urls[i]){
          const img = document.createElement('img');
          img.src = body.overlay_urls[i];
          fig.appendChild(img);
          cap.textContent = 'Period ' + pair.period + ': ' + pair.percentage.toFixed(2) + '%';
        } else {
          cap.textContent = 'Period ' + pair.period + ': skipped (' + pair.reason + ')';
        }
        fig.appendChild(cap);
        row.appendChild(fig);
      });
      document.getElementById('trend').src = body.trend_chart_url;
      document.getElementById('panel').src = body.panel_url;
      document.getElementById('results').hidden = false;
      status('average ' + body.trend.average.toFixed(2) + '% over ' + body.trend.compared_pairs + ' periods');
    };
    document.getElementById('chat').onsubmit = async (ev)=>{
      ev.preventDefault();
      if(!current) return;
      const message = new FormData(ev.target).get('message');
      const reply = document.getElementById('reply');
      reply.textContent = 'thinking...';
      const resp = await fetch('/chat', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ message: message, analysis_id: current.id })
      });
      const body = await resp.json();
      reply.textContent = resp.ok ? body.reply : (body.code + ': ' + body.message);
    };
    document.getElementById('query').onsubmit = async (ev)=>{
      ev.preventDefault();
      const answer = document.getElementById('answer');
      answer.textContent = 'thinking...';
      const resp = await fetch('/api/analyze', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ query: new FormData(ev.target).get('query') })
      });
      const body = await resp.json();
      if(!resp.ok){ answer.textContent = body.code + ': ' + body.message; return; }
      const a = body.analysis;
      if(a.status === 'structured'){
        const lines = [a.direct_answer, 'Rate: ' + a.deforestation_rate];
        if(a.location) lines.push('Location: ' + a.location);
        (a.recommendations || []).forEach((r)=> lines.push('- ' + r));
        answer.textContent = lines.join('\n');
      } else if(a.status === 'unstructured'){
        answer.textContent = a.direct_answer;
      } else {
        answer.textContent = 'Unavailable: ' + a.reason;
      }
    };
  })();
  </script>
</body>
</html>
"#;

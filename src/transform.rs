//! Transform planning: captions, watermark geometry, and the transcoder
//! command line.
//!
//! Everything here is pure apart from the existence check on the watermark
//! asset in [`build_transform_plan`]. Invalid bitrates or corrupt assets are
//! left for the transcoder to reject.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::models::{TransformPlan, WatermarkPlan};

/// Unsharp mask applied when enhancement is on.
const ENHANCE_FILTER: &str = "unsharp=5:5:1.0:5:5:0.5";

/// Build the post caption.
///
/// A non-empty description is interpolated into `template` at `{desc}`; if
/// there is no description or no placeholder, the template is used verbatim.
/// The hashtag suffix is appended and the result trimmed.
pub fn build_caption(template: &str, hashtags: &str, description: Option<&str>) -> String {
    let base = match description {
        Some(desc) if !desc.is_empty() && template.contains("{desc}") => {
            template.replace("{desc}", desc)
        }
        _ => template.to_string(),
    };
    format!("{} {}", base, hashtags).trim().to_string()
}

/// One of the nine compass positions for the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Start,
    Middle,
    End,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Anchor::TopLeft => "TL",
            Anchor::TopCenter => "TC",
            Anchor::TopRight => "TR",
            Anchor::CenterLeft => "CL",
            Anchor::Center => "CC",
            Anchor::CenterRight => "CR",
            Anchor::BottomLeft => "BL",
            Anchor::BottomCenter => "BC",
            Anchor::BottomRight => "BR",
        }
    }

    fn horizontal(self) -> Align {
        match self {
            Anchor::TopLeft | Anchor::CenterLeft | Anchor::BottomLeft => Align::Start,
            Anchor::TopRight | Anchor::CenterRight | Anchor::BottomRight => Align::End,
            _ => Align::Middle,
        }
    }

    fn vertical(self) -> Align {
        match self {
            Anchor::TopLeft | Anchor::TopCenter | Anchor::TopRight => Align::Start,
            Anchor::BottomLeft | Anchor::BottomCenter | Anchor::BottomRight => Align::End,
            _ => Align::Middle,
        }
    }
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Anchor::ALL
            .into_iter()
            .find(|a| a.code() == code)
            .ok_or_else(|| format!("Unknown anchor code: '{}'", s))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn align(align: Align, logo: i64, canvas: i64, padding: i64) -> i64 {
    match align {
        Align::Start => padding,
        Align::End => canvas - logo - padding,
        Align::Middle => (canvas - logo) / 2,
    }
}

/// Top-left corner of a `logo_w`×`logo_h` logo placed at `anchor` on the
/// canvas, `padding` pixels away from the anchored edges.
pub fn place_watermark(
    anchor: Anchor,
    logo_w: u32,
    logo_h: u32,
    canvas_w: u32,
    canvas_h: u32,
    padding: i64,
) -> (i64, i64) {
    (
        align(anchor.horizontal(), logo_w as i64, canvas_w as i64, padding),
        align(anchor.vertical(), logo_h as i64, canvas_h as i64, padding),
    )
}

/// Assemble the transcoder plan from the current configuration.
///
/// The watermark sub-plan is omitted when watermarking is disabled or the
/// asset is not on disk.
pub fn build_transform_plan(config: &Config) -> TransformPlan {
    let wm = &config.watermark;
    let watermark = match &wm.path {
        Some(path) if wm.enabled && !path.as_os_str().is_empty() && path.exists() => {
            let (x, y) = match (wm.x, wm.y) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    // Config validation guarantees a known code.
                    let anchor = wm.anchor.parse().unwrap_or(Anchor::TopLeft);
                    place_watermark(
                        anchor,
                        wm.logo_width,
                        wm.logo_height,
                        config.transform.width,
                        config.transform.height,
                        wm.padding,
                    )
                }
            };
            Some(WatermarkPlan {
                path: path.clone(),
                x,
                y,
                opacity: wm.opacity,
            })
        }
        _ => None,
    };

    TransformPlan {
        width: config.transform.width,
        height: config.transform.height,
        enhance: config.transform.enhance,
        watermark,
        bitrate: config.transform.bitrate.clone(),
    }
}

/// Video filter chain for the main input: fit inside the target frame,
/// letterbox on black, optionally sharpen.
pub fn scale_filter(plan: &TransformPlan) -> String {
    let (w, h) = (plan.width, plan.height);
    let mut filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black"
    );
    if plan.enhance {
        filter.push(',');
        filter.push_str(ENHANCE_FILTER);
    }
    filter
}

/// Full filter graph. With a watermark the logo's channels are scaled by the
/// opacity and overlaid on the scaled video.
pub fn filter_graph(plan: &TransformPlan) -> String {
    let base = scale_filter(plan);
    match &plan.watermark {
        None => base,
        Some(wm) => {
            let o = wm.opacity;
            format!(
                "[0:v]{base}[base];\
                 [1:v]format=rgba,geq=r='r(X,Y)*{o}':g='g(X,Y)*{o}':b='b(X,Y)*{o}':a='a(X,Y)*{o}'[wm];\
                 [base][wm]overlay={x}:{y}",
                x = wm.x,
                y = wm.y
            )
        }
    }
}

/// Arguments for one `ffmpeg` invocation (program name excluded).
pub fn ffmpeg_args(plan: &TransformPlan, input: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.display().to_string(),
    ];

    match &plan.watermark {
        Some(wm) => {
            args.extend(["-i".into(), wm.path.display().to_string()]);
            args.extend(["-filter_complex".into(), filter_graph(plan)]);
        }
        None => {
            args.extend(["-vf".into(), scale_filter(plan)]);
        }
    }

    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-b:v",
            plan.bitrate.as_str(),
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
        ]
        .map(String::from),
    );
    args.push(output.display().to_string());
    args
}

/// Print the plan and caption that the current configuration would produce,
/// plus the exact transcoder command line.
pub fn run_plan(config: &Config, input: Option<&Path>, output: Option<&Path>) {
    let plan = build_transform_plan(config);

    println!("Frame:      {}x{}", plan.width, plan.height);
    println!("Bitrate:    {}", plan.bitrate);
    println!("Enhance:    {}", plan.enhance);
    match &plan.watermark {
        Some(wm) => println!(
            "Watermark:  {} at ({}, {}) opacity {}",
            wm.path.display(),
            wm.x,
            wm.y,
            wm.opacity
        ),
        None => println!("Watermark:  none"),
    }
    println!(
        "Caption:    {}",
        build_caption(
            &config.caption.template,
            &config.caption.hashtags,
            Some("<description>")
        )
    );

    let input = input.unwrap_or_else(|| Path::new("input.mp4"));
    let default_output = config.paths.output_dir.join("processed_input.mp4");
    let output = output.unwrap_or(default_output.as_path());
    let args = ffmpeg_args(&plan, input, output);
    println!();
    println!("{} {}", config.transform.ffmpeg_path, args.join(" "));
}
